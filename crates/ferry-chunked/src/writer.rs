use std::io::{self, Write};

use ferry_session::{ObjectWriter, SessionError, SessionResult};
use tracing::{debug, warn};

use crate::config::ChunkConfig;
use crate::error::{ChunkError, ChunkResult};
use crate::marker::Marker;
use crate::store::{ChunkTxn, NewChunk};

enum WriteState {
    Open,
    Committed,
    Failed(ChunkError),
}

/// Write session that splits a byte stream into chunk rows.
///
/// Bytes accumulate in memory; once more than `max_chunk_size` bytes are
/// buffered the whole buffer becomes one row. Close writes whatever is left
/// as the final row and commits. A zero-byte object is stored as a single
/// empty row so that it can be read back.
///
/// The first failure is latched: later writes and closes return it again.
/// Dropping an uncommitted writer rolls its transaction back.
pub struct ChunkWriter {
    key: String,
    txn: Option<Box<dyn ChunkTxn>>,
    max_chunk_size: usize,
    next_sequence: i64,
    buffer: Vec<u8>,
    state: WriteState,
}

impl ChunkWriter {
    pub fn new(key: impl Into<String>, txn: Box<dyn ChunkTxn>, config: ChunkConfig) -> Self {
        Self {
            key: key.into(),
            txn: Some(txn),
            max_chunk_size: config.max_chunk_size(),
            next_sequence: 0,
            buffer: Vec::new(),
            state: WriteState::Open,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rows inserted so far.
    pub fn chunks_written(&self) -> i64 {
        self.next_sequence
    }

    /// Bytes buffered but not yet inserted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes, flushing one row when the buffer passes the threshold.
    pub fn append(&mut self, data: &[u8]) -> ChunkResult<()> {
        self.check_open()?;
        if data.is_empty() {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_chunk_size {
            self.flush_buffer(false).map_err(|err| self.latch(err))?;
        }
        Ok(())
    }

    /// Write `data` as the object's final row in one call.
    ///
    /// Anything already buffered is flushed first as a non-final row. The
    /// object still needs [`finish`](Self::finish) to commit.
    pub fn write_final(&mut self, data: &[u8]) -> ChunkResult<()> {
        self.check_open()?;
        if !self.buffer.is_empty() {
            self.flush_buffer(false).map_err(|err| self.latch(err))?;
        }
        self.insert(data, true).map_err(|err| self.latch(err))
    }

    /// Flush the remainder as the final row and commit.
    ///
    /// Idempotent after success. After a failure the transaction is rolled
    /// back once and the latched error is returned on every call.
    pub fn finish(&mut self) -> ChunkResult<()> {
        if matches!(self.state, WriteState::Committed) {
            return Ok(());
        }
        let pending = !self.buffer.is_empty() || self.next_sequence == 0;
        if matches!(self.state, WriteState::Open) && pending {
            if let Err(err) = self.flush_buffer(true) {
                self.state = WriteState::Failed(err);
            }
        }

        if let WriteState::Failed(err) = &self.state {
            let err = err.clone();
            return Err(self.abort(err));
        }

        if let Some(mut txn) = self.txn.take() {
            if let Err(err) = txn.commit() {
                warn!(key = %self.key, error = %err, "chunk commit failed");
                return Err(self.latch(err));
            }
        }
        self.state = WriteState::Committed;
        debug!(key = %self.key, chunks = self.next_sequence, "object committed");
        Ok(())
    }

    fn check_open(&self) -> ChunkResult<()> {
        match &self.state {
            WriteState::Open => Ok(()),
            WriteState::Committed => Err(ChunkError::Closed),
            WriteState::Failed(err) => Err(err.clone()),
        }
    }

    fn latch(&mut self, err: ChunkError) -> ChunkError {
        self.state = WriteState::Failed(err.clone());
        err
    }

    /// Roll back a failed session; a rollback failure is joined to `cause`.
    fn abort(&mut self, cause: ChunkError) -> ChunkError {
        let Some(mut txn) = self.txn.take() else {
            return cause;
        };
        match txn.rollback() {
            Ok(()) => {
                debug!(key = %self.key, "write session rolled back");
                cause
            }
            Err(rollback) => {
                let joined = ChunkError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                };
                self.latch(joined)
            }
        }
    }

    fn flush_buffer(&mut self, last: bool) -> ChunkResult<()> {
        let payload = std::mem::take(&mut self.buffer);
        let result = self.insert(&payload, last);
        self.buffer = payload;
        if result.is_ok() {
            self.buffer.clear();
        }
        result
    }

    /// Insert one row at the next sequence. A uniqueness violation means an
    /// older object lives under the key: its rows are deleted and the insert
    /// retried once.
    fn insert(&mut self, payload: &[u8], last: bool) -> ChunkResult<()> {
        let txn = self.txn.as_mut().ok_or(ChunkError::Closed)?;
        let chunk = NewChunk {
            key: &self.key,
            marker: Marker::for_chunk(self.next_sequence, last),
            sequence: self.next_sequence,
            payload,
        };
        match txn.insert_chunk(&chunk) {
            Ok(()) => {}
            Err(ChunkError::UniqueViolation { .. }) => {
                let removed = txn.delete_key(&self.key)?;
                warn!(
                    key = %self.key,
                    sequence = chunk.sequence,
                    removed,
                    "replacing existing chunks"
                );
                txn.insert_chunk(&chunk)?;
            }
            Err(err) => return Err(err),
        }
        debug!(
            key = %self.key,
            sequence = chunk.sequence,
            marker = chunk.marker.code(),
            bytes = payload.len(),
            "chunk inserted"
        );
        self.next_sequence += 1;
        Ok(())
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)
            .map(|()| buf.len())
            .map_err(|err| SessionError::from(err).into_io())
    }

    /// Row boundaries follow the threshold only; there is nothing to flush early.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for ChunkWriter {
    fn close(&mut self) -> SessionResult<()> {
        self.finish().map_err(SessionError::from)
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            warn!(key = %self.key, "write session dropped before close, rolling back");
            if let Err(err) = txn.rollback() {
                warn!(key = %self.key, error = %err, "rollback on drop failed");
            }
        }
    }
}
