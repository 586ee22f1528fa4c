use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{SessionError, SessionResult};
use crate::object::ObjectInfo;
use crate::path;
use crate::traits::{ObjectReader, ObjectWriter, Session};

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

type ObjectMap = Arc<RwLock<BTreeMap<String, MemoryObject>>>;

/// In-memory session keyed by normalized paths.
///
/// Directories are implied by `/` in keys, so listing a directory that holds
/// nothing returns an empty list rather than an error. Intended for tests and
/// embedding.
#[derive(Default)]
pub struct InMemorySession {
    objects: ObjectMap,
}

impl InMemorySession {
    /// Create a new empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// All stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Copy of the bytes stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(&normalize(key))
            .map(|obj| obj.data.clone())
    }
}

fn normalize(key: &str) -> String {
    path::clean(key).trim_start_matches('/').to_string()
}

impl Session for InMemorySession {
    fn list(&self, remote_path: &str) -> SessionResult<Vec<ObjectInfo>> {
        let dir = normalize(remote_path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let map = self.objects.read().expect("lock poisoned");
        let mut entries: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        for (key, obj) in map.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    entries
                        .entry(child.to_string())
                        .or_insert_with(|| ObjectInfo::dir(child, None));
                }
                None => {
                    entries.insert(
                        rest.to_string(),
                        ObjectInfo::file(rest, Some(obj.data.len() as u64), Some(obj.modified)),
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        let map = self.objects.read().expect("lock poisoned");
        let obj = map
            .get(&normalize(key))
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        Ok(Box::new(MemoryReader {
            cursor: Cursor::new(obj.data.clone()),
        }))
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            key: normalize(key),
            buffer: Vec::new(),
            closed: false,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        let obj = map
            .remove(&normalize(from))
            .ok_or_else(|| SessionError::NotFound(from.to_string()))?;
        map.insert(normalize(to), obj);
        Ok(())
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.remove(&normalize(key))
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession")
            .field("object_count", &self.len())
            .finish()
    }
}

struct MemoryReader {
    cursor: Cursor<Vec<u8>>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl ObjectReader for MemoryReader {
    fn close(&mut self) -> SessionResult<()> {
        Ok(())
    }
}

struct MemoryWriter {
    objects: ObjectMap,
    key: String,
    buffer: Vec<u8>,
    closed: bool,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(SessionError::Closed.into_io());
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryWriter {
    fn close(&mut self) -> SessionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let obj = MemoryObject {
            data: std::mem::take(&mut self.buffer),
            modified: Utc::now(),
        };
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(self.key.clone(), obj);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_invisible_until_close() {
        let session = InMemorySession::new();
        let mut writer = session.open_write("a.txt").unwrap();
        writer.write_all(b"abc").unwrap();
        assert!(!session.exists("a.txt").unwrap());
        writer.close().unwrap();
        assert_eq!(session.get("a.txt").unwrap(), b"abc");
    }

    #[test]
    fn dropped_writer_discards_data() {
        let session = InMemorySession::new();
        {
            let mut writer = session.open_write("a.txt").unwrap();
            writer.write_all(b"abc").unwrap();
        }
        assert!(session.is_empty());
    }

    #[test]
    fn close_twice_is_noop() {
        let session = InMemorySession::new();
        let mut writer = session.open_write("a.txt").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        let err = writer.write(b"late").unwrap_err();
        assert!(matches!(SessionError::from(err), SessionError::Closed));
    }

    #[test]
    fn list_reports_directories_once() {
        let session = InMemorySession::new();
        session.write_whole("d/a", b"1").unwrap();
        session.write_whole("d/b", b"22").unwrap();
        session.write_whole("top", b"333").unwrap();

        let root = session.list("").unwrap();
        assert_eq!(root.len(), 2);
        assert!(root.iter().any(|e| e.name == "d" && e.is_dir));
        assert!(root.iter().any(|e| e.name == "top" && e.size == Some(3)));

        let sub = session.list("d").unwrap();
        assert_eq!(sub.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn list_ignores_sibling_with_shared_prefix() {
        let session = InMemorySession::new();
        session.write_whole("d/a", b"1").unwrap();
        session.write_whole("dx/b", b"1").unwrap();
        let sub = session.list("d").unwrap();
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn missing_objects() {
        let session = InMemorySession::new();
        assert!(session.open_read("nope").err().unwrap().is_not_found());
        assert!(session.delete("nope").unwrap_err().is_not_found());
        assert!(session.rename("nope", "x").unwrap_err().is_not_found());
        assert!(!session.exists("nope").unwrap());
        assert!(session.list("nowhere").unwrap().is_empty());
    }
}
