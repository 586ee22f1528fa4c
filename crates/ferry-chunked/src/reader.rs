use std::collections::VecDeque;
use std::io::{self, Read};

use ferry_session::{ObjectReader, SessionError, SessionResult};
use tracing::{debug, warn};

use crate::error::{ChunkError, ChunkResult};
use crate::store::{ChunkRef, ChunkSnapshot, ChunkStore};

/// Read session that reassembles an object from its chunk rows.
///
/// The row index is fetched when the reader opens; payloads are pulled one
/// row at a time as the caller consumes bytes. Every row must carry the
/// sequence number after the previous one, starting at 0, or the read fails
/// with [`ChunkError::SequenceGap`]. Failures are latched.
pub struct ChunkReader {
    key: String,
    snapshot: Option<Box<dyn ChunkSnapshot>>,
    pending: VecDeque<ChunkRef>,
    last_sequence: i64,
    current: Vec<u8>,
    pos: usize,
    failure: Option<ChunkError>,
}

impl ChunkReader {
    /// Open `key` on a fresh read snapshot. Fails with
    /// [`ChunkError::Missing`] when no rows exist.
    pub fn open(store: &dyn ChunkStore, key: &str) -> ChunkResult<Self> {
        let mut snapshot = store.begin_read()?;
        let refs = match snapshot.chunk_refs(key) {
            Ok(refs) if !refs.is_empty() => refs,
            Ok(_) => {
                release_quietly(key, snapshot.as_mut());
                return Err(ChunkError::Missing(key.to_string()));
            }
            Err(err) => {
                release_quietly(key, snapshot.as_mut());
                return Err(err);
            }
        };
        debug!(key, chunks = refs.len(), "opened chunked object");
        Ok(Self {
            key: key.to_string(),
            snapshot: Some(snapshot),
            pending: refs.into(),
            last_sequence: -1,
            current: Vec::new(),
            pos: 0,
            failure: None,
        })
    }

    /// Load the next row into `current`. Returns `false` at end of object.
    fn next_chunk(&mut self) -> ChunkResult<bool> {
        let Some(next) = self.pending.pop_front() else {
            return Ok(false);
        };
        let expected = self.last_sequence + 1;
        if next.sequence != expected {
            return Err(ChunkError::SequenceGap {
                key: self.key.clone(),
                expected,
                found: next.sequence,
            });
        }
        let snapshot = self.snapshot.as_mut().ok_or(ChunkError::Closed)?;
        self.current = snapshot.chunk_payload(next.id)?;
        self.pos = 0;
        self.last_sequence = next.sequence;
        Ok(true)
    }

    /// Release the snapshot. Calling it again is a no-op.
    pub fn release(&mut self) -> ChunkResult<()> {
        self.pending.clear();
        match self.snapshot.take() {
            Some(mut snapshot) => snapshot.release(),
            None => Ok(()),
        }
    }
}

fn release_quietly(key: &str, snapshot: &mut dyn ChunkSnapshot) {
    if let Err(err) = snapshot.release() {
        warn!(key, error = %err, "failed to release read snapshot");
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = &self.failure {
            return Err(SessionError::from(err.clone()).into_io());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            match self.next_chunk() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(err) => {
                    self.failure = Some(err.clone());
                    return Err(SessionError::from(err).into_io());
                }
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl ObjectReader for ChunkReader {
    fn close(&mut self) -> SessionResult<()> {
        self.release().map_err(SessionError::from)
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        if let Some(mut snapshot) = self.snapshot.take() {
            release_quietly(&self.key, snapshot.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;
    use crate::config::ChunkConfig;
    use crate::memory::InMemoryChunkStore;
    use crate::writer::ChunkWriter;

    fn store_object(store: &InMemoryChunkStore, key: &str, data: &[u8], size: usize) {
        let mut w = ChunkWriter::new(key, store.begin_write().unwrap(), ChunkConfig::new(size));
        w.write_all(data).unwrap();
        w.finish().unwrap();
    }

    #[test]
    fn reads_back_across_rows() {
        let store = InMemoryChunkStore::new();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        store_object(&store, "k", &data, 1024);

        let mut r = ChunkReader::open(&store, "k").unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        r.release().unwrap();
        r.release().unwrap();
    }

    #[test]
    fn empty_object_reads_zero_bytes() {
        let store = InMemoryChunkStore::new();
        store_object(&store, "e", b"", 1024);
        let mut r = ChunkReader::open(&store, "e").unwrap();
        let mut out = Vec::new();
        assert_eq!(r.read_to_end(&mut out).unwrap(), 0);
    }

    #[test]
    fn missing_key() {
        let store = InMemoryChunkStore::new();
        assert!(matches!(
            ChunkReader::open(&store, "nope"),
            Err(ChunkError::Missing(_))
        ));
    }

    #[test]
    fn gap_fails_after_delivering_prefix() {
        let store = InMemoryChunkStore::new();
        store.insert_raw("g", 0, b"abc");
        store.insert_raw("g", 2, b"xyz");

        let mut r = ChunkReader::open(&store, "g").unwrap();
        let mut buf = [0u8; 3];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        let err = r.read(&mut buf).unwrap_err();
        match SessionError::from(err) {
            SessionError::SequenceIntegrity {
                expected, found, ..
            } => assert_eq!((expected, found), (1, 2)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(r.read(&mut buf).is_err());
    }

    #[test]
    fn must_start_at_zero() {
        let store = InMemoryChunkStore::new();
        store.insert_raw("late", 1, b"abc");
        let mut r = ChunkReader::open(&store, "late").unwrap();
        let mut out = Vec::new();
        assert!(r.read_to_end(&mut out).is_err());
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn stream_is_independent_of_buffer_sizes(
            data in proptest::collection::vec(any::<u8>(), 0..6000),
            write_step in 1usize..3000,
            read_step in 1usize..3000,
        ) {
            let store = InMemoryChunkStore::new();
            let mut w = ChunkWriter::new("p", store.begin_write().unwrap(), ChunkConfig::new(1024));
            for piece in data.chunks(write_step) {
                w.write_all(piece).unwrap();
            }
            w.finish().unwrap();

            let rows = store.rows("p");
            for (i, row) in rows.iter().enumerate() {
                prop_assert_eq!(row.sequence, i as i64);
            }

            let mut r = ChunkReader::open(&store, "p").unwrap();
            let mut out = Vec::new();
            let mut buf = vec![0u8; read_step];
            loop {
                let n = r.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(out, data);
        }
    }
}
