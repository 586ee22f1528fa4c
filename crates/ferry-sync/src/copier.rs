use std::path::Path;

use ferry_session::{path, Session};
use tracing::info;

use crate::error::{Action, SyncError, SyncResult};
use crate::transfer::{download_file, upload_file};

/// Which way a [`Copier`] moves data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Local file to remote object.
    Upload,
    /// Remote object to local file.
    Download,
}

/// Copies single objects between the local filesystem and a session.
///
/// Relative remote paths are resolved against `base_dir`; absolute ones are
/// used as given. Local paths are never rewritten.
pub struct Copier<S> {
    session: S,
    base_dir: String,
    direction: Direction,
}

impl<S: Session> Copier<S> {
    pub fn new(session: S, base_dir: impl Into<String>, direction: Direction) -> Self {
        Self {
            session,
            base_dir: base_dir.into(),
            direction,
        }
    }

    pub fn upload(session: S, base_dir: impl Into<String>) -> Self {
        Self::new(session, base_dir, Direction::Upload)
    }

    pub fn download(session: S, base_dir: impl Into<String>) -> Self {
        Self::new(session, base_dir, Direction::Download)
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The remote key a remote-facing path maps to.
    pub fn resolve(&self, remote: &str) -> String {
        if self.base_dir.is_empty() || path::is_absolute(remote) {
            path::to_slash(Path::new(remote))
        } else {
            path::join(&self.base_dir, &path::to_slash(Path::new(remote)))
        }
    }

    /// Copy `src` to `dest` in this copier's direction and return the bytes
    /// moved. For uploads `src` is local and `dest` remote; downloads swap.
    pub fn copy(&self, src: &str, dest: &str) -> SyncResult<u64> {
        let (action, local, remote) = match self.direction {
            Direction::Upload => (Action::Upload, src, self.resolve(dest)),
            Direction::Download => (Action::Download, dest, self.resolve(src)),
        };
        let local_path = Path::new(local);
        let result = match self.direction {
            Direction::Upload => upload_file(&self.session, local_path, &remote),
            Direction::Download => download_file(&self.session, &remote, local_path),
        };
        match result {
            Ok(bytes) => {
                info!(%action, local, remote = %remote, bytes, "copied");
                Ok(bytes)
            }
            Err(err) => Err(SyncError::Transfer {
                action,
                local: local_path.to_path_buf(),
                remote,
                source: Box::new(err),
            }),
        }
    }

    /// Close the underlying session.
    pub fn close(&self) -> SyncResult<()> {
        Ok(self.session.close()?)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use ferry_session::InMemorySession;

    use super::*;

    #[test]
    fn relative_paths_resolve_against_base() {
        let c = Copier::upload(InMemorySession::new(), "base/dir");
        assert_eq!(c.resolve("a/b.txt"), "base/dir/a/b.txt");
        assert_eq!(c.resolve("/abs/b.txt"), "/abs/b.txt");
        assert_eq!(c.resolve("./x"), "base/dir/x");

        let bare = Copier::upload(InMemorySession::new(), "");
        assert_eq!(bare.resolve("a/b.txt"), "a/b.txt");
    }

    #[test]
    fn upload_and_download_through_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        fs::write(&src, b"payload").unwrap();

        let session = Arc::new(InMemorySession::new());
        let up = Copier::upload(Arc::clone(&session), "inbox");
        assert_eq!(up.copy(src.to_str().unwrap(), "in.txt").unwrap(), 7);
        assert_eq!(session.get("inbox/in.txt").unwrap(), b"payload");

        let out = dir.path().join("out.txt");
        let down = Copier::download(Arc::clone(&session), "inbox");
        assert_eq!(down.copy("in.txt", out.to_str().unwrap()).unwrap(), 7);
        assert_eq!(fs::read(&out).unwrap(), b"payload");
    }

    #[test]
    fn failure_names_both_ends() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let down = Copier::download(InMemorySession::new(), "inbox");
        let err = down.copy("missing.txt", out.to_str().unwrap()).unwrap_err();
        assert!(err.is_not_found());
        match err {
            SyncError::Transfer { action, remote, .. } => {
                assert_eq!(action, Action::Download);
                assert_eq!(remote, "inbox/missing.txt");
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
