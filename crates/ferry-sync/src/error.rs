use std::fmt;
use std::io;
use std::path::PathBuf;

use ferry_session::SessionError;
use thiserror::Error;

/// Errors from file transfers and directory synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A local filesystem operation failed.
    #[error("{path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file transfer failed; carries both ends for context.
    #[error("{action} {local} <-> {remote} failed: {source}")]
    Transfer {
        action: Action,
        local: PathBuf,
        remote: String,
        #[source]
        source: Box<SyncError>,
    },

    /// A directory download finished with failures. One entry per failed
    /// path, flattened across the whole tree.
    #[error("{}", describe_partial(.0))]
    Partial(Vec<TransferFailure>),
}

/// The step a [`SyncError::Transfer`] failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    DeleteBeforeUpload,
    Upload,
    DeleteAfterUpload,
    Download,
    DeleteAfterDownload,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::DeleteBeforeUpload => "delete before upload",
            Action::Upload => "upload",
            Action::DeleteAfterUpload => "delete after upload",
            Action::Download => "download",
            Action::DeleteAfterDownload => "delete after download",
        })
    }
}

/// One failed path inside [`SyncError::Partial`].
#[derive(Debug)]
pub struct TransferFailure {
    pub remote: String,
    pub error: SyncError,
}

fn describe_partial(failures: &[TransferFailure]) -> String {
    let mut text = format!("{} path(s) failed to download:", failures.len());
    for failure in failures {
        text.push_str(&format!(" {} ({});", failure.remote, failure.error));
    }
    text.pop();
    text
}

impl SyncError {
    pub fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Local {
            path: path.into(),
            source,
        }
    }

    /// True when the root cause is a missing object or file.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Session(err) => err.is_not_found(),
            SyncError::Local { source, .. } => source.kind() == io::ErrorKind::NotFound,
            SyncError::Transfer { source, .. } => source.is_not_found(),
            SyncError::Partial(_) => false,
        }
    }

    /// Paths of a partial failure, empty for any other error.
    pub fn failed_paths(&self) -> Vec<&str> {
        match self {
            SyncError::Partial(failures) => failures.iter().map(|f| f.remote.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
