use ferry_session::SessionError;
use thiserror::Error;

/// Errors from the chunk codec and the stores behind it.
///
/// Cloneable so a write or read session can latch the first failure and
/// return it again on every later call.
#[derive(Clone, Debug, Error)]
pub enum ChunkError {
    /// No rows are stored under the key.
    #[error("no chunks stored under {0}")]
    Missing(String),

    /// A row arrived out of order while reassembling an object.
    #[error("chunk sequence broken for {key}: expected {expected}, found {found}")]
    SequenceGap {
        key: String,
        expected: i64,
        found: i64,
    },

    /// The store rejected a row because `(key, sequence)` already exists.
    #[error("duplicate chunk {sequence} for {key}")]
    UniqueViolation { key: String, sequence: i64 },

    /// Begin, commit or rollback failed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// A failure whose rollback failed too.
    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<ChunkError>,
        rollback: Box<ChunkError>,
    },

    /// The flat chunk namespace was used like a directory tree.
    #[error("{0}")]
    Usage(String),

    /// Table names end up inside SQL text and must be plain identifiers.
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    /// The write session has already been committed.
    #[error("write session already closed")]
    Closed,

    /// Any other failure reported by the backing store.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ChunkError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        ChunkError::Backend(err.to_string())
    }
}

impl From<ChunkError> for SessionError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Missing(key) => SessionError::NotFound(key),
            ChunkError::SequenceGap {
                key,
                expected,
                found,
            } => SessionError::SequenceIntegrity {
                key,
                expected,
                found,
            },
            ChunkError::UniqueViolation { key, sequence } => {
                SessionError::UniquenessConflict { key, sequence }
            }
            ChunkError::Transaction(msg) => SessionError::Transaction(msg),
            ChunkError::RollbackFailed { cause, rollback } => SessionError::RollbackFailed {
                cause: Box::new(SessionError::from(*cause)),
                rollback: Box::new(SessionError::from(*rollback)),
            },
            ChunkError::Usage(msg) => SessionError::Usage(msg),
            ChunkError::InvalidTable(name) => {
                SessionError::Usage(format!("invalid table name: {name:?}"))
            }
            ChunkError::Closed => SessionError::Closed,
            ChunkError::Backend(msg) => SessionError::Backend(msg),
        }
    }
}

/// Result alias for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_session_kinds() {
        let err: SessionError = ChunkError::Missing("k".into()).into();
        assert!(err.is_not_found());

        let err: SessionError = ChunkError::UniqueViolation {
            key: "k".into(),
            sequence: 0,
        }
        .into();
        assert!(matches!(err, SessionError::UniquenessConflict { sequence: 0, .. }));

        let err: SessionError = ChunkError::RollbackFailed {
            cause: Box::new(ChunkError::Backend("disk full".into())),
            rollback: Box::new(ChunkError::Transaction("gone".into())),
        }
        .into();
        match err {
            SessionError::RollbackFailed { cause, rollback } => {
                assert!(matches!(*cause, SessionError::Backend(_)));
                assert!(matches!(*rollback, SessionError::Transaction(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
