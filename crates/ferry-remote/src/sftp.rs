use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ferry_session::{path, ObjectInfo, SessionError, SessionResult};
use ssh2::{FileStat, RenameFlags, Session as SshSession, Sftp};
use tracing::{debug, info, warn};

use crate::spool::{RemoteFs, RemoteSession};

pub type SftpSession = RemoteSession<SftpClient>;

#[derive(Clone, Debug, Default)]
pub struct SftpOptions {
    /// `host:port`
    pub address: String,
    pub username: String,
    pub password: String,
}

/// SFTP subsystem of one authenticated SSH connection.
///
/// Uploads go to a hidden sibling file first and are renamed over the
/// target once complete, so readers never see a half-written file.
pub struct SftpClient {
    ssh: SshSession,
    sftp: Sftp,
}

fn ssh_error(err: ssh2::Error, path: &str) -> SessionError {
    SessionError::from_io(io::Error::from(err), path)
}

impl SftpClient {
    pub fn connect(options: &SftpOptions) -> SessionResult<Self> {
        info!(address = %options.address, user = %options.username, "connecting to sftp server");
        let tcp = TcpStream::connect(&options.address)
            .map_err(|e| SessionError::from_io(e, &options.address))?;
        let mut ssh = SshSession::new().map_err(|e| ssh_error(e, &options.address))?;
        ssh.set_tcp_stream(tcp);
        ssh.handshake().map_err(|e| ssh_error(e, &options.address))?;
        ssh.userauth_password(&options.username, &options.password)
            .map_err(|e| ssh_error(e, &options.address))?;
        let sftp = ssh.sftp().map_err(|e| ssh_error(e, &options.address))?;
        Ok(Self { ssh, sftp })
    }

    pub fn open(options: &SftpOptions) -> SessionResult<SftpSession> {
        Ok(RemoteSession::new(Self::connect(options)?))
    }

    /// Create missing parent directories of `target`, top down.
    fn ensure_parent(&self, target: &str) -> SessionResult<()> {
        let (parent, _) = path::split(target);
        let mut current = String::new();
        for segment in parent.split('/') {
            if segment.is_empty() {
                if current.is_empty() && target.starts_with('/') {
                    current.push('/');
                }
                continue;
            }
            current = if current.is_empty() || current == "/" {
                format!("{current}{segment}")
            } else {
                format!("{current}/{segment}")
            };
            let dir = Path::new(&current);
            if self.sftp.stat(dir).is_err() {
                self.sftp.mkdir(dir, 0o755).map_err(|e| ssh_error(e, &current))?;
                debug!(dir = %current, "created remote directory");
            }
        }
        Ok(())
    }
}

/// Hidden sibling used while an upload is in flight.
fn partial_path(target: &str) -> String {
    let (parent, name) = path::split(target);
    let partial = format!(".{name}.ferry-part");
    if parent.is_empty() {
        partial
    } else {
        format!("{}/{partial}", parent.trim_end_matches('/'))
    }
}

fn entry(path: &Path, stat: &FileStat) -> Option<ObjectInfo> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let modified = stat
        .mtime
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    Some(if stat.is_dir() {
        ObjectInfo::dir(name, modified)
    } else {
        ObjectInfo::file(name, stat.size, modified)
    })
}

impl RemoteFs for SftpClient {
    fn list(&mut self, dir: &str) -> SessionResult<Vec<ObjectInfo>> {
        let target = if dir.is_empty() { "." } else { dir };
        let listing = self
            .sftp
            .readdir(Path::new(target))
            .map_err(|e| ssh_error(e, dir))?;
        Ok(listing
            .iter()
            .filter_map(|(path, stat)| entry(path, stat))
            .collect())
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
        let mut file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| ssh_error(e, path))?;
        Ok(io::copy(&mut file, sink)?)
    }

    fn store(&mut self, path: &str, source: &mut dyn Read) -> SessionResult<u64> {
        self.ensure_parent(path)?;
        let partial = partial_path(path);
        let partial_file = PathBuf::from(&partial);
        let mut file = self
            .sftp
            .create(&partial_file)
            .map_err(|e| ssh_error(e, &partial))?;
        let copied = io::copy(source, &mut file).and_then(|n| file.flush().map(|()| n));
        drop(file);
        let renamed = copied.map_err(SessionError::from).and_then(|n| {
            let flags = RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE;
            self.sftp
                .rename(&partial_file, Path::new(path), Some(flags))
                .map(|()| n)
                .map_err(|e| ssh_error(e, path))
        });
        if renamed.is_err() {
            if let Err(err) = self.sftp.unlink(&partial_file) {
                warn!(path = %partial, error = %err, "could not remove partial upload");
            }
        }
        renamed
    }

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        self.sftp
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| ssh_error(e, from))
    }

    fn remove(&mut self, path: &str) -> SessionResult<()> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| ssh_error(e, path))
    }

    fn quit(&mut self) -> SessionResult<()> {
        self.ssh
            .disconnect(None, "ferry session closed", None)
            .map_err(|e| ssh_error(e, ""))
    }
}

#[cfg(test)]
mod tests {
    use ssh2::ErrorCode;

    use super::*;

    // LIBSSH2_FX_NO_SUCH_FILE
    const NO_SUCH_FILE: i32 = 2;

    #[test]
    fn missing_remote_file_is_not_found() {
        let err = ssh_error(ssh2::Error::new(ErrorCode::SFTP(NO_SUCH_FILE), "no such file"), "a.txt");
        assert!(err.is_not_found());
        let err = ssh_error(ssh2::Error::new(ErrorCode::Session(-18), "auth failed"), "host");
        assert!(!err.is_not_found());
    }

    #[test]
    fn partial_upload_is_a_hidden_sibling() {
        assert_eq!(partial_path("a.txt"), ".a.txt.ferry-part");
        assert_eq!(partial_path("in/2024/a.txt"), "in/2024/.a.txt.ferry-part");
        assert_eq!(partial_path("/srv/a.txt"), "/srv/.a.txt.ferry-part");
    }

    #[test]
    fn stat_entries_become_object_infos() {
        let stat = FileStat {
            size: Some(42),
            uid: None,
            gid: None,
            perm: Some(0o100644),
            atime: None,
            mtime: Some(1_700_000_000),
        };
        let info = entry(Path::new("/srv/data/a.bin"), &stat).unwrap();
        assert_eq!(info.name, "a.bin");
        assert_eq!(info.size, Some(42));
        assert!(!info.is_dir);
        assert_eq!(info.modified.unwrap().timestamp(), 1_700_000_000);

        let dir = FileStat {
            perm: Some(0o040755),
            ..stat
        };
        assert!(entry(Path::new("sub"), &dir).unwrap().is_dir);
        assert!(entry(Path::new("/"), &dir).is_none());
    }

    #[test]
    fn refused_connection_fails_to_open() {
        let options = SftpOptions {
            address: "127.0.0.1:1".into(),
            ..SftpOptions::default()
        };
        assert!(SftpClient::open(&options).is_err());
    }
}
