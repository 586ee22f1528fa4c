use chrono::{DateTime, Utc};

use crate::error::ChunkResult;
use crate::marker::Marker;

/// A chunk row about to be inserted.
#[derive(Clone, Copy, Debug)]
pub struct NewChunk<'a> {
    pub key: &'a str,
    pub marker: Marker,
    pub sequence: i64,
    pub payload: &'a [u8],
}

/// Row identity and position, fetched before payloads are pulled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRef {
    pub id: i64,
    pub sequence: i64,
}

/// One logical object as reported by a store listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Total payload bytes across the object's rows.
    pub size: Option<u64>,
    /// Newest `created_at` among the rows.
    pub created_at: Option<DateTime<Utc>>,
}

/// Write scope held for the lifetime of one write session.
///
/// Stores without real transactions may make `commit` and `rollback`
/// no-ops; rows then become visible as they are inserted.
pub trait ChunkTxn: Send {
    /// Insert one row. A `(key, sequence)` collision must surface as
    /// [`ChunkError::UniqueViolation`](crate::ChunkError::UniqueViolation).
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()>;

    /// Remove every row stored under `key`, returning the row count.
    fn delete_key(&mut self, key: &str) -> ChunkResult<u64>;

    fn commit(&mut self) -> ChunkResult<()>;

    fn rollback(&mut self) -> ChunkResult<()>;
}

/// Read scope held for the lifetime of one read session.
pub trait ChunkSnapshot: Send {
    /// Row ids and sequence numbers for `key`, ordered by sequence.
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>>;

    /// Payload of one row.
    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>>;

    /// Release the snapshot. Called at most once.
    fn release(&mut self) -> ChunkResult<()>;
}

/// A relational table holding chunk rows, reached either directly or
/// through a remote gateway.
///
/// The codec in [`ChunkedSession`](crate::ChunkedSession) is written once
/// against this trait.
pub trait ChunkStore: Send + Sync {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>>;

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>>;

    /// One summary per distinct key, ordered by key.
    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>>;

    /// Whether any row is stored under `key`. The default scans the listing.
    fn contains(&self, key: &str) -> ChunkResult<bool> {
        Ok(self.list_objects()?.iter().any(|object| object.key == key))
    }

    /// Re-key every row of `from`; returns the affected row count.
    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64>;

    /// Remove every row of `key`; returns the affected row count.
    fn delete(&self, key: &str) -> ChunkResult<u64>;

    fn close(&self) -> ChunkResult<()> {
        Ok(())
    }
}

impl<S: ChunkStore + ?Sized> ChunkStore for std::sync::Arc<S> {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        (**self).begin_write()
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        (**self).begin_read()
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        (**self).list_objects()
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        (**self).contains(key)
    }

    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        (**self).rename(from, to)
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        (**self).delete(key)
    }

    fn close(&self) -> ChunkResult<()> {
        (**self).close()
    }
}
