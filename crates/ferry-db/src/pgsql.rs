use std::sync::{Arc, Mutex};

use ferry_chunked::{
    parse_timestamp, ChunkError, ChunkRef, ChunkResult, ChunkSnapshot, ChunkStore, ChunkTxn,
    Dialect, NewChunk, ObjectSummary, TableSql,
};
use postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info};

use crate::error::{backend, is_postgres_unique_violation, transaction};
use crate::options::ServerOptions;

/// Chunk store on a PostgreSQL server.
///
/// Write and read sessions each get their own connection. A unique
/// violation aborts a PostgreSQL transaction, so every insert runs under a
/// savepoint that is rolled back on failure, which keeps the writer's
/// delete-and-retry inside the same transaction. Readers use a
/// `REPEATABLE READ` snapshot.
pub struct PostgresStore {
    config: Config,
    sql: Arc<TableSql>,
    client: Mutex<Client>,
}

impl PostgresStore {
    pub fn connect(config: Config, options: ServerOptions) -> ChunkResult<Self> {
        let sql = TableSql::with_dialect(&options.table, Dialect::Postgres)?;
        info!(
            host = ?config.get_hosts(),
            dbname = config.get_dbname().unwrap_or_default(),
            table = sql.table(),
            "opening postgres chunk store"
        );
        let client = config.connect(NoTls).map_err(backend)?;
        let store = Self {
            config,
            sql: Arc::new(sql),
            client: Mutex::new(client),
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
        let mut client = self.client.lock().expect("lock poisoned");
        client
            .batch_execute(&self.sql.create_table())
            .map_err(backend)?;
        debug!(table = self.sql.table(), "chunk table ready");
        Ok(())
    }

    fn session_client(&self, begin: &str) -> ChunkResult<Client> {
        let mut client = self.config.connect(NoTls).map_err(backend)?;
        client.batch_execute(begin).map_err(transaction)?;
        Ok(client)
    }
}

/// The chunk layout declares `marker` and `sequence_index` as 32-bit `INTEGER`.
fn int4(value: i64, column: &str) -> ChunkResult<i32> {
    i32::try_from(value)
        .map_err(|_| ChunkError::Backend(format!("{column} {value} does not fit an INTEGER column")))
}

fn summary(row: &Row) -> ChunkResult<ObjectSummary> {
    let key: String = row.try_get(0).map_err(backend)?;
    let size: Option<i64> = row.try_get(1).map_err(backend)?;
    let created: Option<String> = row.try_get(2).map_err(backend)?;
    Ok(ObjectSummary {
        key,
        size: size.and_then(|s| u64::try_from(s).ok()),
        created_at: created.as_deref().and_then(parse_timestamp),
    })
}

impl ChunkStore for PostgresStore {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        Ok(Box::new(PostgresTxn {
            client: self.session_client("BEGIN")?,
            sql: Arc::clone(&self.sql),
            open: true,
        }))
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        Ok(Box::new(PostgresSnapshot {
            client: self.session_client("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")?,
            sql: Arc::clone(&self.sql),
            open: true,
        }))
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        let mut client = self.client.lock().expect("lock poisoned");
        let rows = client.query(&self.sql.list, &[]).map_err(backend)?;
        rows.iter().map(summary).collect()
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        let mut client = self.client.lock().expect("lock poisoned");
        let found = client
            .query_opt(&self.sql.exists, &[&key])
            .map_err(backend)?;
        Ok(found.is_some())
    }

    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        let mut client = self.client.lock().expect("lock poisoned");
        match client.execute(&self.sql.rename, &[&to, &from]) {
            Ok(rows) => Ok(rows),
            Err(err) if is_postgres_unique_violation(&err) => Err(ChunkError::UniqueViolation {
                key: to.to_string(),
                sequence: 0,
            }),
            Err(err) => Err(backend(err)),
        }
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        let mut client = self.client.lock().expect("lock poisoned");
        client.execute(&self.sql.delete, &[&key]).map_err(backend)
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("table", &self.sql.table())
            .finish_non_exhaustive()
    }
}

struct PostgresTxn {
    client: Client,
    sql: Arc<TableSql>,
    open: bool,
}

impl PostgresTxn {
    fn end(&mut self, statement: &str) -> ChunkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.client.batch_execute(statement).map_err(transaction)
    }
}

impl ChunkTxn for PostgresTxn {
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()> {
        let marker = int4(chunk.marker.code(), "marker")?;
        let sequence = int4(chunk.sequence, "sequence_index")?;
        self.client
            .batch_execute("SAVEPOINT chunk_insert")
            .map_err(transaction)?;
        let result = self.client.execute(
            &self.sql.insert,
            &[&chunk.key, &marker, &sequence, &chunk.payload],
        );
        match result {
            Ok(_) => self
                .client
                .batch_execute("RELEASE SAVEPOINT chunk_insert")
                .map_err(transaction),
            Err(err) => {
                self.client
                    .batch_execute("ROLLBACK TO SAVEPOINT chunk_insert")
                    .map_err(transaction)?;
                if is_postgres_unique_violation(&err) {
                    Err(ChunkError::UniqueViolation {
                        key: chunk.key.to_string(),
                        sequence: chunk.sequence,
                    })
                } else {
                    Err(backend(err))
                }
            }
        }
    }

    fn delete_key(&mut self, key: &str) -> ChunkResult<u64> {
        self.client.execute(&self.sql.delete, &[&key]).map_err(backend)
    }

    fn commit(&mut self) -> ChunkResult<()> {
        self.end("COMMIT")
    }

    fn rollback(&mut self) -> ChunkResult<()> {
        self.end("ROLLBACK")
    }
}

struct PostgresSnapshot {
    client: Client,
    sql: Arc<TableSql>,
    open: bool,
}

impl ChunkSnapshot for PostgresSnapshot {
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>> {
        let rows = self
            .client
            .query(&self.sql.select_refs, &[&key])
            .map_err(backend)?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get(0).map_err(backend)?;
                let sequence: i32 = row.try_get(1).map_err(backend)?;
                Ok(ChunkRef {
                    id,
                    sequence: i64::from(sequence),
                })
            })
            .collect()
    }

    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>> {
        let row = self
            .client
            .query_opt(&self.sql.select_payload, &[&id])
            .map_err(backend)?
            .ok_or_else(|| ChunkError::Backend(format!("chunk row {id} disappeared")))?;
        let payload: Option<Vec<u8>> = row.try_get(0).map_err(backend)?;
        Ok(payload.unwrap_or_default())
    }

    fn release(&mut self) -> ChunkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.client.batch_execute("COMMIT").map_err(transaction)
    }
}
