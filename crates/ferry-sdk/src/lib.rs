//! Embedding API for ferry.
//!
//! [`open`] turns a URL into a ready [`Session`]; the re-exports below cover
//! everything needed to move files through it.

pub mod error;
pub mod open;

pub use error::{SdkError, SdkResult};
pub use open::{open, OpenOptions, Target};

// Re-export key types
pub use ferry_chunked::{ChunkConfig, ChunkedSession, TableSql};
pub use ferry_session::{
    path, with_prefix, InMemorySession, LocalSession, ObjectInfo, PrefixedSession, Session,
    SessionError, SessionResult,
};
pub use ferry_sync::{
    delete_if_exists, download_dir, download_file, upload_dir, upload_file, Copier, Direction,
    SyncError, SyncResult, TransferReport, UploadOptions,
};
