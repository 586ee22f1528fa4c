use std::io::{self, Read, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ferry_session::{ObjectInfo, SessionError, SessionResult};
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::{debug, info, warn};

use crate::spool::{RemoteFs, RemoteSession};

pub type FtpSession = RemoteSession<FtpClient>;

/// Where and how to log in.
#[derive(Clone, Debug, Default)]
pub struct FtpOptions {
    /// `host:port`
    pub address: String,
    /// Empty means anonymous login.
    pub username: String,
    pub password: String,
    /// Changed into after login; relative keys resolve against it.
    pub root_dir: String,
    /// Use plain `PASV` instead of `EPSV` for data connections.
    pub disable_epsv: bool,
}

impl FtpOptions {
    pub fn mode(&self) -> Mode {
        if self.disable_epsv {
            Mode::Passive
        } else {
            Mode::ExtendedPassive
        }
    }

    fn credentials(&self) -> (&str, &str) {
        if self.username.is_empty() {
            ("anonymous", "anonymous")
        } else {
            (&self.username, &self.password)
        }
    }
}

/// FTP control connection.
pub struct FtpClient {
    stream: FtpStream,
}

impl FtpClient {
    pub fn connect(options: &FtpOptions) -> SessionResult<Self> {
        info!(address = %options.address, root = %options.root_dir, "connecting to ftp server");
        let mut stream =
            FtpStream::connect(&options.address).map_err(|e| ftp_error(e, &options.address))?;
        let (user, password) = options.credentials();
        if let Err(err) = stream.login(user, password) {
            let _ = stream.quit();
            return Err(ftp_error(err, &options.address));
        }
        stream.set_mode(options.mode());
        let setup = stream.transfer_type(FileType::Binary).and_then(|()| {
            if options.root_dir.is_empty() {
                Ok(())
            } else {
                stream.cwd(&options.root_dir)
            }
        });
        if let Err(err) = setup {
            let _ = stream.quit();
            return Err(ftp_error(err, &options.root_dir));
        }
        Ok(Self { stream })
    }

    /// Connect and wrap the client in a session.
    pub fn open(options: &FtpOptions) -> SessionResult<FtpSession> {
        Ok(RemoteSession::new(Self::connect(options)?))
    }
}

/// 550 is how servers say a file or directory is missing or inaccessible.
fn ftp_error(err: FtpError, path: &str) -> SessionError {
    match err {
        FtpError::ConnectionError(io) => SessionError::from_io(io, path),
        FtpError::UnexpectedResponse(response)
            if matches!(response.status, Status::FileUnavailable) =>
        {
            SessionError::NotFound(path.to_string())
        }
        other => SessionError::Backend(other.to_string()),
    }
}

/// Parse one `LIST` line in UNIX or DOS format.
fn parse_entry(line: &str) -> Option<ObjectInfo> {
    let entry = ListEntry::from_str(line).ok()?;
    let modified = Some(DateTime::<Utc>::from(entry.modified()));
    Some(if entry.is_directory() {
        ObjectInfo::dir(entry.name(), modified)
    } else {
        ObjectInfo::file(entry.name(), Some(entry.size() as u64), modified)
    })
}

impl RemoteFs for FtpClient {
    fn list(&mut self, dir: &str) -> SessionResult<Vec<ObjectInfo>> {
        let target = (!dir.is_empty()).then_some(dir);
        let lines = self.stream.list(target).map_err(|e| ftp_error(e, dir))?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            match parse_entry(line) {
                Some(entry) => entries.push(entry),
                None => warn!(line = %line, "skipping unparsable listing line"),
            }
        }
        Ok(entries)
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
        let mut data = self
            .stream
            .retr_as_stream(path)
            .map_err(|e| ftp_error(e, path))?;
        let copied = io::copy(&mut data, sink)?;
        self.stream
            .finalize_retr_stream(data)
            .map_err(|e| ftp_error(e, path))?;
        Ok(copied)
    }

    fn store(&mut self, path: &str, mut source: &mut dyn Read) -> SessionResult<u64> {
        let bytes = self
            .stream
            .put_file(path, &mut source)
            .map_err(|e| ftp_error(e, path))?;
        debug!(path, bytes, "ftp upload finished");
        Ok(bytes)
    }

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        self.stream.rename(from, to).map_err(|e| ftp_error(e, from))
    }

    fn remove(&mut self, path: &str) -> SessionResult<()> {
        self.stream.rm(path).map_err(|e| ftp_error(e, path))
    }

    fn quit(&mut self) -> SessionResult<()> {
        self.stream.quit().map_err(|e| ftp_error(e, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsv_switch_selects_the_passive_mode() {
        let options = FtpOptions::default();
        assert!(matches!(options.mode(), Mode::ExtendedPassive));
        let options = FtpOptions {
            disable_epsv: true,
            ..FtpOptions::default()
        };
        assert!(matches!(options.mode(), Mode::Passive));
    }

    #[test]
    fn empty_username_logs_in_anonymously() {
        assert_eq!(FtpOptions::default().credentials(), ("anonymous", "anonymous"));
        let options = FtpOptions {
            username: "loader".into(),
            password: "pw".into(),
            ..FtpOptions::default()
        };
        assert_eq!(options.credentials(), ("loader", "pw"));
    }

    #[test]
    fn parses_unix_listing_lines() {
        let file = parse_entry("-rw-r--r--    1 ftp      ftp          1234 Nov 05 13:46 report.csv")
            .unwrap();
        assert_eq!(file.name, "report.csv");
        assert_eq!(file.size, Some(1234));
        assert!(!file.is_dir);
        assert!(file.modified.is_some());

        let dir = parse_entry("drwxr-xr-x    2 ftp      ftp          4096 Jan 01  2023 archive")
            .unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.name, "archive");

        assert!(parse_entry("total 8").is_none());
    }

    #[test]
    fn connection_errors_keep_their_kind() {
        let refused = ftp_error(
            FtpError::ConnectionError(io::Error::from(io::ErrorKind::ConnectionRefused)),
            "host:21",
        );
        assert!(matches!(refused, SessionError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionRefused));
        let missing = ftp_error(
            FtpError::ConnectionError(io::Error::from(io::ErrorKind::NotFound)),
            "a.txt",
        );
        assert!(missing.is_not_found());
    }

    #[test]
    fn refused_connection_fails_to_open() {
        let options = FtpOptions {
            address: "127.0.0.1:1".into(),
            ..FtpOptions::default()
        };
        assert!(FtpClient::open(&options).is_err());
    }
}
