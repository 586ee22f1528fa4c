use std::sync::{Arc, Mutex};

use ferry_chunked::{
    parse_timestamp, ChunkError, ChunkRef, ChunkResult, ChunkSnapshot, ChunkStore, ChunkTxn,
    Dialect, NewChunk, ObjectSummary, TableSql,
};
use mysql::prelude::Queryable;
use mysql::{from_row_opt, Conn, Opts, Row};
use tracing::{debug, info};

use crate::error::{backend, is_mysql_unique_violation, transaction};
use crate::options::ServerOptions;

/// Chunk store on a MySQL or MariaDB server (InnoDB tables).
///
/// Write and read sessions each get their own connection. A duplicate key
/// only fails the offending statement, so the writer's delete-and-retry
/// needs no savepoint here. Readers start a consistent snapshot.
pub struct MysqlStore {
    opts: Opts,
    sql: Arc<TableSql>,
    conn: Mutex<Conn>,
}

impl MysqlStore {
    pub fn connect(opts: Opts, options: ServerOptions) -> ChunkResult<Self> {
        let sql = TableSql::with_dialect(&options.table, Dialect::Mysql)?;
        info!(
            host = %opts.get_ip_or_hostname(),
            db = opts.get_db_name().unwrap_or_default(),
            table = sql.table(),
            "opening mysql chunk store"
        );
        let conn = Conn::new(opts.clone()).map_err(backend)?;
        let store = Self {
            opts,
            sql: Arc::new(sql),
            conn: Mutex::new(conn),
        };
        if options.create_table {
            store.create_table()?;
        }
        Ok(store)
    }

    pub fn sql(&self) -> &TableSql {
        &self.sql
    }

    pub fn create_table(&self) -> ChunkResult<()> {
        let mut conn = self.conn.lock().expect("lock poisoned");
        conn.query_drop(self.sql.create_table()).map_err(backend)?;
        debug!(table = self.sql.table(), "chunk table ready");
        Ok(())
    }

    fn session_conn(&self, begin: &str) -> ChunkResult<Conn> {
        let mut conn = Conn::new(self.opts.clone()).map_err(backend)?;
        conn.query_drop(begin).map_err(transaction)?;
        Ok(conn)
    }
}

fn summary(row: Row) -> ChunkResult<ObjectSummary> {
    let (key, size, created) =
        from_row_opt::<(String, Option<i64>, Option<String>)>(row).map_err(backend)?;
    Ok(ObjectSummary {
        key,
        size: size.and_then(|s| u64::try_from(s).ok()),
        created_at: created.as_deref().and_then(parse_timestamp),
    })
}

impl ChunkStore for MysqlStore {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        Ok(Box::new(MysqlTxn {
            conn: self.session_conn("START TRANSACTION")?,
            sql: Arc::clone(&self.sql),
            open: true,
        }))
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        Ok(Box::new(MysqlSnapshot {
            conn: self.session_conn("START TRANSACTION WITH CONSISTENT SNAPSHOT, READ ONLY")?,
            sql: Arc::clone(&self.sql),
            open: true,
        }))
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        let mut conn = self.conn.lock().expect("lock poisoned");
        let rows: Vec<Row> = conn.query(self.sql.list.as_str()).map_err(backend)?;
        rows.into_iter().map(summary).collect()
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        let mut conn = self.conn.lock().expect("lock poisoned");
        let found: Option<Row> = conn
            .exec_first(self.sql.exists.as_str(), (key,))
            .map_err(backend)?;
        Ok(found.is_some())
    }

    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        let mut conn = self.conn.lock().expect("lock poisoned");
        match conn.exec_drop(self.sql.rename.as_str(), (to, from)) {
            Ok(()) => Ok(conn.affected_rows()),
            Err(err) if is_mysql_unique_violation(&err) => Err(ChunkError::UniqueViolation {
                key: to.to_string(),
                sequence: 0,
            }),
            Err(err) => Err(backend(err)),
        }
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        let mut conn = self.conn.lock().expect("lock poisoned");
        conn.exec_drop(self.sql.delete.as_str(), (key,))
            .map_err(backend)?;
        Ok(conn.affected_rows())
    }
}

impl std::fmt::Debug for MysqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlStore")
            .field("table", &self.sql.table())
            .finish_non_exhaustive()
    }
}

struct MysqlTxn {
    conn: Conn,
    sql: Arc<TableSql>,
    open: bool,
}

impl MysqlTxn {
    fn end(&mut self, statement: &str) -> ChunkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.conn.query_drop(statement).map_err(transaction)
    }
}

impl ChunkTxn for MysqlTxn {
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()> {
        let params = (chunk.key, chunk.marker.code(), chunk.sequence, chunk.payload);
        match self.conn.exec_drop(self.sql.insert.as_str(), params) {
            Ok(()) => Ok(()),
            Err(err) if is_mysql_unique_violation(&err) => Err(ChunkError::UniqueViolation {
                key: chunk.key.to_string(),
                sequence: chunk.sequence,
            }),
            Err(err) => Err(backend(err)),
        }
    }

    fn delete_key(&mut self, key: &str) -> ChunkResult<u64> {
        self.conn
            .exec_drop(self.sql.delete.as_str(), (key,))
            .map_err(backend)?;
        Ok(self.conn.affected_rows())
    }

    fn commit(&mut self) -> ChunkResult<()> {
        self.end("COMMIT")
    }

    fn rollback(&mut self) -> ChunkResult<()> {
        self.end("ROLLBACK")
    }
}

struct MysqlSnapshot {
    conn: Conn,
    sql: Arc<TableSql>,
    open: bool,
}

impl ChunkSnapshot for MysqlSnapshot {
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>> {
        let rows: Vec<Row> = self
            .conn
            .exec(self.sql.select_refs.as_str(), (key,))
            .map_err(backend)?;
        rows.into_iter()
            .map(|row| {
                let (id, sequence) = from_row_opt::<(i64, i64)>(row).map_err(backend)?;
                Ok(ChunkRef { id, sequence })
            })
            .collect()
    }

    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>> {
        let row: Row = self
            .conn
            .exec_first(self.sql.select_payload.as_str(), (id,))
            .map_err(backend)?
            .ok_or_else(|| ChunkError::Backend(format!("chunk row {id} disappeared")))?;
        let (payload,) = from_row_opt::<(Option<Vec<u8>>,)>(row).map_err(backend)?;
        Ok(payload.unwrap_or_default())
    }

    fn release(&mut self) -> ChunkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.conn.query_drop("COMMIT").map_err(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_rendered_for_mysql() {
        let sql = TableSql::with_dialect("blobs", Dialect::Mysql).unwrap();
        assert!(sql.create_table().contains("id BIGINT AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.list.contains("CAST(MAX(created_at) AS CHAR)"));
        assert!(sql.insert.ends_with("VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)"));
    }

    #[test]
    fn unreachable_server_is_a_backend_error() {
        let opts = Opts::from_url("mysql://ferry@127.0.0.1:1/ferry").unwrap();
        let err = MysqlStore::connect(opts, ServerOptions::default()).unwrap_err();
        assert!(matches!(err, ChunkError::Backend(_)));
    }

    #[test]
    fn invalid_table_is_rejected_before_connecting() {
        let opts = Opts::from_url("mysql://ferry@127.0.0.1:1/ferry").unwrap();
        let options = ServerOptions {
            table: "1chunks".into(),
            create_table: false,
        };
        assert!(matches!(
            MysqlStore::connect(opts, options),
            Err(ChunkError::InvalidTable(_))
        ));
    }
}
