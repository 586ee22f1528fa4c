use std::io;

use thiserror::Error;

/// Errors surfaced by any [`Session`](crate::Session) implementation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The object, file or directory does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Stored chunks for an object are not a contiguous `0..N-1` run.
    #[error("chunk sequence broken for {key}: expected {expected}, found {found}")]
    SequenceIntegrity {
        key: String,
        expected: i64,
        found: i64,
    },

    /// A chunk row collided with an existing `(key, sequence)` pair and the
    /// single recovery attempt did not resolve it.
    #[error("uniqueness conflict on {key} at sequence {sequence}")]
    UniquenessConflict { key: String, sequence: i64 },

    /// Commit, rollback or begin failed on the backing store.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// An operation failed and the rollback that followed failed as well.
    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<SessionError>,
        rollback: Box<SessionError>,
    },

    /// The caller used the session in a way the backend does not allow.
    #[error("usage error: {0}")]
    Usage(String),

    /// The backend or scheme is recognized but not available in this build.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A stream was used after it had been closed.
    #[error("stream already closed")]
    Closed,

    /// Opaque failure reported by the backing store.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error from the local filesystem or a transport.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl SessionError {
    /// Returns `true` for "does not exist" outcomes, including I/O errors of
    /// kind [`io::ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            SessionError::NotFound(_) => true,
            SessionError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Map an I/O error for `path`, turning "not found" into [`SessionError::NotFound`].
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            SessionError::NotFound(path.into())
        } else {
            SessionError::Io(err)
        }
    }

    /// Wrap this error so it can travel through `std::io::Read`/`Write`.
    pub fn into_io(self) -> io::Error {
        match self {
            SessionError::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}

impl From<io::Error> for SessionError {
    /// Recovers a `SessionError` that was wrapped by [`SessionError::into_io`].
    fn from(err: io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .is_some_and(|inner| inner.is::<SessionError>());
        if !wrapped {
            return SessionError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<SessionError>()) {
            Some(Ok(session)) => *session,
            Some(Err(other)) => SessionError::Io(io::Error::new(kind, other)),
            None => SessionError::Io(io::Error::from(kind)),
        }
    }
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
