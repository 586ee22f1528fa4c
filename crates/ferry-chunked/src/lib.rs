//! Chunked blob storage over a relational table.
//!
//! An object is a run of rows sharing an `object_key`, numbered by
//! `sequence_index` from 0. The codec ([`ChunkWriter`], [`ChunkReader`]) is
//! written once against the [`ChunkStore`] strategy traits; the `ferry-db`
//! and `ferry-gateway` crates provide the stores.
//!
//! # Table layout
//!
//! | column           | type    | notes                              |
//! |------------------|---------|------------------------------------|
//! | `id`             | integer | auto-increment primary key         |
//! | `object_key`     | text    | logical object name                |
//! | `marker`         | integer | see [`Marker`]                     |
//! | `sequence_index` | integer | 0-based position, unique per key   |
//! | `payload`        | blob    | chunk bytes                        |
//! | `created_at`     | time    | insertion time                     |

pub mod config;
pub mod error;
pub mod marker;
pub mod memory;
pub mod reader;
pub mod session;
pub mod sql;
pub mod store;
pub mod time;
pub mod writer;

pub use config::{ChunkConfig, DEFAULT_MAX_CHUNK_SIZE, MIN_MAX_CHUNK_SIZE};
pub use error::{ChunkError, ChunkResult};
pub use marker::Marker;
pub use memory::{InMemoryChunkStore, StoredRow};
pub use reader::ChunkReader;
pub use session::ChunkedSession;
pub use sql::{Dialect, TableSql};
pub use store::{ChunkRef, ChunkSnapshot, ChunkStore, ChunkTxn, NewChunk, ObjectSummary};
pub use time::parse_timestamp;
pub use writer::ChunkWriter;
