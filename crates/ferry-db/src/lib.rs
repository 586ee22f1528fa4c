//! Direct database backends for ferry's chunked storage.
//!
//! [`SqliteStore`], [`PostgresStore`] and [`MysqlStore`] implement
//! [`ChunkStore`](ferry_chunked::ChunkStore) on a database the process
//! connects to itself; wrap one in
//! [`ChunkedSession`](ferry_chunked::ChunkedSession) to get a
//! [`Session`](ferry_session::Session).

pub mod error;
pub mod mysqldb;
pub mod options;
pub mod pgsql;
pub mod sqlite;

pub use mysqldb::MysqlStore;
pub use options::ServerOptions;
pub use pgsql::PostgresStore;
pub use sqlite::{SqliteOptions, SqliteStore, DEFAULT_BUSY_TIMEOUT};
