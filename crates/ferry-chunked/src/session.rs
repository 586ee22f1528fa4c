use ferry_session::{path, ObjectInfo, ObjectReader, ObjectWriter, Session, SessionError, SessionResult};
use tracing::debug;

use crate::config::ChunkConfig;
use crate::error::ChunkError;
use crate::reader::ChunkReader;
use crate::store::ChunkStore;
use crate::writer::ChunkWriter;

/// [`Session`] over a chunk table.
///
/// The namespace is flat: every key is one object, `list` only accepts the
/// root, and keys are used exactly as given.
pub struct ChunkedSession<S> {
    store: S,
    config: ChunkConfig,
}

impl<S: ChunkStore> ChunkedSession<S> {
    pub fn new(store: S, config: ChunkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    fn writer(&self, key: &str) -> SessionResult<ChunkWriter> {
        let txn = self.store.begin_write()?;
        Ok(ChunkWriter::new(key, txn, self.config))
    }
}

impl<S: ChunkStore> Session for ChunkedSession<S> {
    fn list(&self, remote_path: &str) -> SessionResult<Vec<ObjectInfo>> {
        if !path::clean(remote_path).trim_start_matches('/').is_empty() {
            return Err(ChunkError::Usage(format!(
                "chunked storage has no directories; cannot list {remote_path:?}"
            ))
            .into());
        }
        let objects = self.store.list_objects()?;
        Ok(objects
            .into_iter()
            .map(|object| ObjectInfo::file(object.key, object.size, object.created_at))
            .collect())
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        let reader = ChunkReader::open(&self.store, key)?;
        Ok(Box::new(reader))
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(self.writer(key)?))
    }

    /// Buffer-free path: `data` becomes the final row directly.
    fn write_whole(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        let mut writer = self.writer(key)?;
        writer.write_final(data)?;
        writer.finish()?;
        Ok(())
    }

    fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.store.contains(key)?)
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        let moved = self.store.rename(from, to)?;
        if moved == 0 {
            return Err(SessionError::NotFound(from.to_string()));
        }
        debug!(from, to, rows = moved, "renamed chunked object");
        Ok(())
    }

    /// Deleting a key with no rows succeeds.
    fn delete(&self, key: &str) -> SessionResult<()> {
        let removed = self.store.delete(key)?;
        debug!(key, rows = removed, "deleted chunked object");
        Ok(())
    }

    fn close(&self) -> SessionResult<()> {
        Ok(self.store.close()?)
    }
}

impl<S> std::fmt::Debug for ChunkedSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSession")
            .field("max_chunk_size", &self.config.max_chunk_size())
            .finish_non_exhaustive()
    }
}
