use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::{ChunkError, ChunkResult};
use crate::marker::Marker;
use crate::store::{ChunkRef, ChunkSnapshot, ChunkStore, ChunkTxn, NewChunk, ObjectSummary};

/// A chunk row as held by [`InMemoryChunkStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRow {
    pub id: i64,
    pub key: String,
    pub marker: i64,
    pub sequence: i64,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    rows: BTreeMap<i64, StoredRow>,
    next_id: i64,
    inserts_allowed: Option<usize>,
    forced_conflicts: usize,
    fail_rollback: bool,
}

impl State {
    fn has(&self, key: &str, sequence: i64) -> bool {
        self.rows
            .values()
            .any(|row| row.key == key && row.sequence == sequence)
    }

    fn push(&mut self, key: &str, marker: i64, sequence: i64, payload: Vec<u8>) {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.insert(
            id,
            StoredRow {
                id,
                key: key.to_string(),
                marker,
                sequence,
                payload,
                created_at: Utc::now(),
            },
        );
    }

    fn remove_key(&mut self, key: &str) -> u64 {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.key != key);
        (before - self.rows.len()) as u64
    }
}

/// Chunk table kept in a `BTreeMap`, with the uniqueness and transaction
/// behavior of a real table. Writes are staged per transaction and applied
/// atomically on commit.
///
/// Also offers fault injection for exercising codec error paths.
#[derive(Clone, Default)]
pub struct InMemoryChunkStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows for `key`, ordered by sequence.
    pub fn rows(&self, key: &str) -> Vec<StoredRow> {
        let state = self.state.lock().expect("lock poisoned");
        let mut rows: Vec<StoredRow> = state
            .rows
            .values()
            .filter(|row| row.key == key)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.sequence);
        rows
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").rows.len()
    }

    /// Insert a committed row directly, bypassing the codec.
    pub fn insert_raw(&self, key: &str, sequence: i64, payload: &[u8]) {
        let mut state = self.state.lock().expect("lock poisoned");
        let marker = Marker::for_chunk(sequence, false).code();
        state.push(key, marker, sequence, payload.to_vec());
    }

    /// Let `n` more inserts succeed, then fail every insert.
    pub fn fail_inserts_after(&self, n: usize) {
        self.state.lock().expect("lock poisoned").inserts_allowed = Some(n);
    }

    /// Reject the next `n` inserts as duplicates, whatever the table holds.
    pub fn force_conflicts(&self, n: usize) {
        self.state.lock().expect("lock poisoned").forced_conflicts = n;
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_rollback = fail;
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore")
            .field("rows", &self.row_count())
            .finish()
    }
}

enum Staged {
    Insert {
        key: String,
        marker: i64,
        sequence: i64,
        payload: Vec<u8>,
    },
    DeleteKey(String),
}

struct MemoryTxn {
    state: Arc<Mutex<State>>,
    staged: Vec<Staged>,
}

impl MemoryTxn {
    /// Whether `(key, sequence)` is present once the staged operations are applied.
    fn visible(&self, state: &State, key: &str, sequence: i64) -> bool {
        let mut present = state.has(key, sequence);
        for op in &self.staged {
            match op {
                Staged::Insert {
                    key: k,
                    sequence: s,
                    ..
                } if k == key && *s == sequence => present = true,
                Staged::DeleteKey(k) if k == key => present = false,
                _ => {}
            }
        }
        present
    }
}

impl ChunkTxn for MemoryTxn {
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(allowed) = state.inserts_allowed.as_mut() {
            if *allowed == 0 {
                return Err(ChunkError::Backend("injected insert failure".into()));
            }
            *allowed -= 1;
        }
        let forced = state.forced_conflicts > 0;
        if forced {
            state.forced_conflicts -= 1;
        }
        if forced || self.visible(&state, chunk.key, chunk.sequence) {
            return Err(ChunkError::UniqueViolation {
                key: chunk.key.to_string(),
                sequence: chunk.sequence,
            });
        }
        drop(state);
        self.staged.push(Staged::Insert {
            key: chunk.key.to_string(),
            marker: chunk.marker.code(),
            sequence: chunk.sequence,
            payload: chunk.payload.to_vec(),
        });
        Ok(())
    }

    fn delete_key(&mut self, key: &str) -> ChunkResult<u64> {
        let state = self.state.lock().expect("lock poisoned");
        let committed = state.rows.values().filter(|row| row.key == key).count() as u64;
        drop(state);
        self.staged.push(Staged::DeleteKey(key.to_string()));
        Ok(committed)
    }

    fn commit(&mut self) -> ChunkResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        let mut next = State {
            rows: state.rows.clone(),
            next_id: state.next_id,
            inserts_allowed: state.inserts_allowed,
            forced_conflicts: state.forced_conflicts,
            fail_rollback: state.fail_rollback,
        };
        for op in self.staged.drain(..) {
            match op {
                Staged::DeleteKey(key) => {
                    next.remove_key(&key);
                }
                Staged::Insert {
                    key,
                    marker,
                    sequence,
                    payload,
                } => {
                    if next.has(&key, sequence) {
                        return Err(ChunkError::UniqueViolation { key, sequence });
                    }
                    next.push(&key, marker, sequence, payload);
                }
            }
        }
        *state = next;
        Ok(())
    }

    fn rollback(&mut self) -> ChunkResult<()> {
        self.staged.clear();
        if self.state.lock().expect("lock poisoned").fail_rollback {
            return Err(ChunkError::Transaction("injected rollback failure".into()));
        }
        Ok(())
    }
}

struct MemorySnapshot {
    state: Arc<Mutex<State>>,
}

impl ChunkSnapshot for MemorySnapshot {
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>> {
        let state = self.state.lock().expect("lock poisoned");
        let mut refs: Vec<ChunkRef> = state
            .rows
            .values()
            .filter(|row| row.key == key)
            .map(|row| ChunkRef {
                id: row.id,
                sequence: row.sequence,
            })
            .collect();
        refs.sort_by_key(|r| r.sequence);
        Ok(refs)
    }

    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .rows
            .get(&id)
            .map(|row| row.payload.clone())
            .ok_or_else(|| ChunkError::Backend(format!("chunk row {id} disappeared")))
    }

    fn release(&mut self) -> ChunkResult<()> {
        Ok(())
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        Ok(Box::new(MemoryTxn {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        Ok(Box::new(MemorySnapshot {
            state: Arc::clone(&self.state),
        }))
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        let state = self.state.lock().expect("lock poisoned");
        let mut summaries: BTreeMap<&str, ObjectSummary> = BTreeMap::new();
        for row in state.rows.values() {
            let entry = summaries
                .entry(row.key.as_str())
                .or_insert_with(|| ObjectSummary {
                    key: row.key.clone(),
                    size: Some(0),
                    created_at: None,
                });
            entry.size = entry.size.map(|s| s + row.payload.len() as u64);
            entry.created_at = entry.created_at.max(Some(row.created_at));
        }
        Ok(summaries.into_values().collect())
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        let state = self.state.lock().expect("lock poisoned");
        Ok(state.rows.values().any(|row| row.key == key))
    }

    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        let moving: Vec<i64> = state
            .rows
            .values()
            .filter(|row| row.key == from)
            .map(|row| row.sequence)
            .collect();
        if let Some(&sequence) = moving.iter().find(|&&s| from != to && state.has(to, s)) {
            return Err(ChunkError::UniqueViolation {
                key: to.to_string(),
                sequence,
            });
        }
        let mut count = 0;
        for row in state.rows.values_mut().filter(|row| row.key == from) {
            row.key = to.to_string();
            count += 1;
        }
        Ok(count)
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        Ok(self.state.lock().expect("lock poisoned").remove_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk<'a>(key: &'a str, sequence: i64, payload: &'a [u8]) -> NewChunk<'a> {
        NewChunk {
            key,
            marker: Marker::for_chunk(sequence, true),
            sequence,
            payload,
        }
    }

    #[test]
    fn staged_until_commit() {
        let store = InMemoryChunkStore::new();
        let mut txn = store.begin_write().unwrap();
        txn.insert_chunk(&chunk("a", 0, b"x")).unwrap();
        assert_eq!(store.row_count(), 0);
        txn.commit().unwrap();
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let store = InMemoryChunkStore::new();
        store.insert_raw("a", 0, b"x");
        let mut txn = store.begin_write().unwrap();
        assert!(matches!(
            txn.insert_chunk(&chunk("a", 0, b"y")),
            Err(ChunkError::UniqueViolation { sequence: 0, .. })
        ));
        assert_eq!(txn.delete_key("a").unwrap(), 1);
        txn.insert_chunk(&chunk("a", 0, b"y")).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.rows("a")[0].payload, b"y");
    }

    #[test]
    fn concurrent_commit_conflict() {
        let store = InMemoryChunkStore::new();
        let mut first = store.begin_write().unwrap();
        let mut second = store.begin_write().unwrap();
        first.insert_chunk(&chunk("a", 0, b"1")).unwrap();
        second.insert_chunk(&chunk("a", 0, b"2")).unwrap();
        first.commit().unwrap();
        assert!(matches!(
            second.commit(),
            Err(ChunkError::UniqueViolation { .. })
        ));
        assert_eq!(store.rows("a")[0].payload, b"1");
    }

    #[test]
    fn listing_sums_payload_bytes() {
        let store = InMemoryChunkStore::new();
        store.insert_raw("b", 0, b"12345");
        store.insert_raw("b", 1, b"678");
        store.insert_raw("a", 0, b"");
        let list = store.list_objects().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].key, "a");
        assert_eq!(list[0].size, Some(0));
        assert_eq!(list[1].size, Some(8));
        assert!(list[1].created_at.is_some());
    }

    #[test]
    fn rename_refuses_to_merge() {
        let store = InMemoryChunkStore::new();
        store.insert_raw("a", 0, b"1");
        store.insert_raw("b", 0, b"2");
        assert!(matches!(
            store.rename("a", "b"),
            Err(ChunkError::UniqueViolation { .. })
        ));
        assert_eq!(store.rename("a", "c").unwrap(), 1);
        assert!(store.contains("c").unwrap());
        assert_eq!(store.rename("zzz", "c").unwrap(), 0);
    }
}
