use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry_chunked::{
    parse_timestamp, ChunkError, ChunkRef, ChunkResult, ChunkSnapshot, ChunkStore, ChunkTxn,
    NewChunk, ObjectSummary, TableSql,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{backend, is_unique_violation, transaction};

/// How long a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for [`SqliteStore::open`].
#[derive(Clone, Debug)]
pub struct SqliteOptions {
    pub table: TableSql,
    /// Run `CREATE TABLE IF NOT EXISTS` on open.
    pub create_table: bool,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            table: TableSql::default(),
            create_table: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Chunk store backed by a SQLite database file.
///
/// Each write session and each read session gets its own connection and
/// transaction, so uncommitted rows stay invisible and a reader sees one
/// consistent version of an object. Listing, rename and delete share a
/// single connection.
///
/// SQLite allows one writer per database. A write session opens a deferred
/// transaction on its first row, so any number of sessions may be open at
/// once, but from that first row until commit it holds the write lock.
/// Other sessions reaching their first row meanwhile wait up to
/// `busy_timeout` and then fail.
pub struct SqliteStore {
    path: PathBuf,
    sql: Arc<TableSql>,
    busy_timeout: Duration,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, options: SqliteOptions) -> ChunkResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), table = options.table.table(), "opening sqlite chunk store");
        let conn = connect(&path, options.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(backend)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(backend)?;

        let store = Self {
            path,
            sql: Arc::new(options.table),
            busy_timeout: options.busy_timeout,
            conn: Mutex::new(conn),
        };
        if options.create_table {
            store.create_table()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sql(&self) -> &TableSql {
        &self.sql
    }

    /// Create the chunk table if it does not exist yet.
    pub fn create_table(&self) -> ChunkResult<()> {
        let ddl = self.sql.create_table();
        let conn = self.conn.lock().expect("lock poisoned");
        conn.execute_batch(&ddl).map_err(backend)?;
        debug!(table = self.sql.table(), "chunk table ready");
        Ok(())
    }
}

fn connect(path: &Path, busy_timeout: Duration) -> ChunkResult<Connection> {
    let conn = Connection::open(path).map_err(backend)?;
    conn.busy_timeout(busy_timeout).map_err(backend)?;
    Ok(conn)
}

impl ChunkStore for SqliteStore {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        let conn = connect(&self.path, self.busy_timeout)?;
        Ok(Box::new(SqliteTxn {
            conn,
            sql: Arc::clone(&self.sql),
            begun: false,
        }))
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        let conn = connect(&self.path, self.busy_timeout)?;
        conn.execute_batch("BEGIN").map_err(transaction)?;
        Ok(Box::new(SqliteSnapshot {
            conn,
            sql: Arc::clone(&self.sql),
            open: true,
        }))
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        let conn = self.conn.lock().expect("lock poisoned");
        let mut stmt = conn.prepare(&self.sql.list).map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let size: Option<i64> = row.get(1)?;
                let created: Value = row.get(2)?;
                Ok((key, size, created))
            })
            .map_err(backend)?;

        let mut objects = Vec::new();
        for row in rows {
            let (key, size, created) = row.map_err(backend)?;
            let created_at = match created {
                Value::Text(text) => parse_timestamp(&text),
                Value::Integer(millis) => parse_timestamp(&millis.to_string()),
                _ => None,
            };
            objects.push(ObjectSummary {
                key,
                size: size.and_then(|s| u64::try_from(s).ok()),
                created_at,
            });
        }
        Ok(objects)
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        let conn = self.conn.lock().expect("lock poisoned");
        let found = conn
            .query_row(&self.sql.exists, [key], |_| Ok(()))
            .optional()
            .map_err(backend)?;
        Ok(found.is_some())
    }

    /// Objects always start at sequence 0, so a collision with an existing
    /// target is reported there.
    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        let conn = self.conn.lock().expect("lock poisoned");
        match conn.execute(&self.sql.rename, params![to, from]) {
            Ok(rows) => Ok(rows as u64),
            Err(err) if is_unique_violation(&err) => Err(ChunkError::UniqueViolation {
                key: to.to_string(),
                sequence: 0,
            }),
            Err(err) => Err(backend(err)),
        }
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        let conn = self.conn.lock().expect("lock poisoned");
        let rows = conn.execute(&self.sql.delete, [key]).map_err(backend)?;
        Ok(rows as u64)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("table", &self.sql.table())
            .finish()
    }
}

/// Write transaction begun lazily by the first statement.
struct SqliteTxn {
    conn: Connection,
    sql: Arc<TableSql>,
    begun: bool,
}

impl SqliteTxn {
    fn begin(&mut self) -> ChunkResult<()> {
        if !self.begun {
            self.conn.execute_batch("BEGIN").map_err(transaction)?;
            self.begun = true;
        }
        Ok(())
    }

    fn end(&mut self, statement: &str) -> ChunkResult<()> {
        if !self.begun {
            return Ok(());
        }
        self.begun = false;
        self.conn.execute_batch(statement).map_err(transaction)
    }
}

impl ChunkTxn for SqliteTxn {
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()> {
        self.begin()?;
        let result = self.conn.execute(
            &self.sql.insert,
            params![chunk.key, chunk.marker.code(), chunk.sequence, chunk.payload],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ChunkError::UniqueViolation {
                key: chunk.key.to_string(),
                sequence: chunk.sequence,
            }),
            Err(err) => Err(backend(err)),
        }
    }

    fn delete_key(&mut self, key: &str) -> ChunkResult<u64> {
        self.begin()?;
        let rows = self.conn.execute(&self.sql.delete, [key]).map_err(backend)?;
        Ok(rows as u64)
    }

    fn commit(&mut self) -> ChunkResult<()> {
        self.end("COMMIT")
    }

    fn rollback(&mut self) -> ChunkResult<()> {
        self.end("ROLLBACK")
    }
}

struct SqliteSnapshot {
    conn: Connection,
    sql: Arc<TableSql>,
    open: bool,
}

impl ChunkSnapshot for SqliteSnapshot {
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>> {
        let mut stmt = self.conn.prepare(&self.sql.select_refs).map_err(backend)?;
        let rows = stmt
            .query_map([key], |row| {
                Ok(ChunkRef {
                    id: row.get(0)?,
                    sequence: row.get(1)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(&self.sql.select_payload, [id], |row| row.get(0))
            .map_err(backend)?;
        Ok(payload.unwrap_or_default())
    }

    fn release(&mut self) -> ChunkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.conn.execute_batch("COMMIT").map_err(transaction)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use ferry_chunked::{ChunkConfig, ChunkedSession};
    use ferry_session::{Session, SessionError};

    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        let options = SqliteOptions {
            create_table: true,
            ..SqliteOptions::default()
        };
        SqliteStore::open(dir.path().join("chunks.db"), options).unwrap()
    }

    fn session(dir: &tempfile::TempDir) -> ChunkedSession<SqliteStore> {
        ChunkedSession::new(open_store(dir), ChunkConfig::new(1024))
    }

    fn read_all(session: &dyn Session, key: &str) -> Vec<u8> {
        let mut r = session.open_read(key).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.close().unwrap();
        out
    }

    fn raw_rows(store: &SqliteStore, key: &str) -> Vec<(i64, i64, usize)> {
        let conn = store.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT marker, sequence_index, LENGTH(payload) FROM object_chunks \
                 WHERE object_key = ? ORDER BY sequence_index",
            )
            .unwrap();
        let rows = stmt
            .query_map([key], |row| {
                Ok::<(i64, i64, usize), rusqlite::Error>((
                    row.get(0)?,
                    row.get(1)?,
                    row.get::<_, i64>(2)? as usize,
                ))
            })
            .unwrap();
        rows.map(Result::unwrap).collect()
    }

    #[test]
    fn stream_round_trip_with_markers() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let mut w = s.open_write("data.bin").unwrap();
        w.write_all(&[1u8; 1500]).unwrap();
        w.write_all(&[2u8; 1500]).unwrap();
        w.write_all(&[3u8; 7]).unwrap();
        w.close().unwrap();

        assert_eq!(
            raw_rows(s.store(), "data.bin"),
            vec![(-1, 0, 1500), (-2, 1, 1500), (0, 2, 7)]
        );
        let back = read_all(&s, "data.bin");
        assert_eq!(back.len(), 3007);
        assert_eq!(&back[1500..1503], &[2, 2, 2]);
    }

    #[test]
    fn uncommitted_rows_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let mut w = s.open_write("k").unwrap();
        w.write_all(&[0u8; 5000]).unwrap();
        assert!(!s.exists("k").unwrap());
        drop(w);
        assert!(!s.exists("k").unwrap());
        assert!(raw_rows(s.store(), "k").is_empty());
    }

    #[test]
    fn overwrite_replaces_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.write_whole("k", &[1u8; 3000]).unwrap();
        s.write_whole("k", b"new").unwrap();
        assert_eq!(read_all(&s, "k"), b"new");
        assert_eq!(raw_rows(s.store(), "k"), vec![(0, 0, 3)]);
    }

    #[test]
    fn listing_reports_byte_totals() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let mut w = s.open_write("big").unwrap();
        w.write_all(&[0u8; 2000]).unwrap();
        w.write_all(&[0u8; 10]).unwrap();
        w.close().unwrap();
        s.write_whole("empty", b"").unwrap();

        let list = s.list("").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "big");
        assert_eq!(list[0].size, Some(2010));
        assert!(list[0].modified.is_some());
        assert_eq!(list[1].size, Some(0));
    }

    #[test]
    fn rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.write_whole("a", b"1").unwrap();
        s.write_whole("b", b"2").unwrap();
        assert!(matches!(
            s.rename("a", "b"),
            Err(SessionError::UniquenessConflict { .. })
        ));
        s.rename("a", "c").unwrap();
        assert!(s.rename("a", "d").unwrap_err().is_not_found());
        s.delete("c").unwrap();
        s.delete("c").unwrap();
        assert!(s.open_read("c").err().unwrap().is_not_found());
    }

    #[test]
    fn reader_keeps_its_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.write_whole("k", &[4u8; 100]).unwrap();

        let mut r = s.open_read("k").unwrap();
        s.delete("k").unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.close().unwrap();
        assert_eq!(out, vec![4u8; 100]);
    }

    #[test]
    fn concurrent_writers_to_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(session(&dir));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    let key = format!("obj{i}");
                    let data = vec![i as u8; 2500];
                    let mut w = s.open_write(&key).unwrap();
                    for piece in data.chunks(700) {
                        w.write_all(piece).unwrap();
                    }
                    w.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4u8 {
            assert_eq!(read_all(s.as_ref(), &format!("obj{i}")), vec![i; 2500]);
        }
    }

    #[test]
    fn write_sessions_on_distinct_keys_can_be_open_together() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteOptions {
            create_table: true,
            busy_timeout: Duration::from_millis(300),
            ..SqliteOptions::default()
        };
        let store = SqliteStore::open(dir.path().join("chunks.db"), options).unwrap();
        let s = ChunkedSession::new(store, ChunkConfig::new(1024));

        let mut a = s.open_write("a").unwrap();
        a.write_all(&[1u8; 2000]).unwrap();
        // `a` holds the write lock now; opening and buffering must not wait on it
        let mut b = s.open_write("b").unwrap();
        b.write_all(b"small").unwrap();
        a.close().unwrap();
        b.write_all(&[2u8; 2000]).unwrap();
        b.close().unwrap();

        assert_eq!(read_all(&s, "a"), vec![1u8; 2000]);
        let back = read_all(&s, "b");
        assert_eq!(&back[..5], b"small");
        assert_eq!(back.len(), 2005);
    }

    #[test]
    fn same_key_writers_leave_one_complete_object() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(session(&dir));
        let handles: Vec<_> = [7u8, 9u8]
            .into_iter()
            .map(|tag| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    let mut w = s.open_write("shared").unwrap();
                    for _ in 0..4 {
                        w.write_all(&[tag; 1025]).unwrap();
                    }
                    w.write_all(&[tag; 10]).unwrap();
                    w.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = raw_rows(s.store(), "shared");
        let sequences: Vec<i64> = rows.iter().map(|row| row.1).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        let back = read_all(s.as_ref(), "shared");
        assert_eq!(back.len(), 4 * 1025 + 10);
        let winner = back[0];
        assert!(winner == 7 || winner == 9);
        assert!(back.iter().all(|&byte| byte == winner));
    }

    #[test]
    fn missing_table_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("x.db"), SqliteOptions::default()).unwrap();
        assert!(matches!(store.list_objects(), Err(ChunkError::Backend(_))));
    }
}
