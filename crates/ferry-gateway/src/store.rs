use std::sync::Arc;

use ferry_chunked::{
    parse_timestamp, ChunkError, ChunkRef, ChunkResult, ChunkSnapshot, ChunkStore, ChunkTxn,
    NewChunk, ObjectSummary, TableSql,
};
use tracing::debug;

use crate::client::GatewayClient;
use crate::error::GatewayError;
use crate::protocol::{QueryResult, SqlParam};

/// Chunk store reached through a [`GatewayClient`].
///
/// The gateway applies every statement on its own, so `commit` and
/// `rollback` are no-ops: rows of a multi-chunk write become visible as they
/// are inserted, and a failed write can leave a partial object behind.
pub struct GatewayStore<C> {
    client: Arc<C>,
    sql: Arc<TableSql>,
}

impl<C: GatewayClient + 'static> GatewayStore<C> {
    pub fn new(client: C, sql: TableSql) -> Self {
        Self {
            client: Arc::new(client),
            sql: Arc::new(sql),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn sql(&self) -> &TableSql {
        &self.sql
    }
}

fn insert_error(err: GatewayError, key: &str, sequence: i64) -> ChunkError {
    if err.is_unique_violation() {
        ChunkError::UniqueViolation {
            key: key.to_string(),
            sequence,
        }
    } else {
        err.into()
    }
}

/// Parse the listing columns by name. Unknown columns are rejected so a
/// misconfigured listing query is noticed instead of silently misread.
fn summaries(result: &QueryResult) -> ChunkResult<Vec<ObjectSummary>> {
    for column in &result.columns {
        if !matches!(
            column.name.to_ascii_lowercase().as_str(),
            "object_key" | "size" | "created_at"
        ) {
            return Err(ChunkError::Backend(format!(
                "unexpected column {:?} in listing",
                column.name
            )));
        }
    }
    let key_col = result
        .column_index("object_key")
        .ok_or_else(|| ChunkError::Backend("listing has no object_key column".into()))?;
    let size_col = result.column_index("size");
    let created_col = result.column_index("created_at");

    let mut objects = Vec::with_capacity(result.rows.len());
    for row in 0..result.rows.len() {
        let key = result
            .text(row, key_col)?
            .ok_or_else(|| ChunkError::Backend("NULL object_key in listing".into()))?;
        let size = match size_col {
            Some(col) => result.integer(row, col)?.and_then(|s| u64::try_from(s).ok()),
            None => None,
        };
        let created_at = match created_col {
            Some(col) => match result.text(row, col)? {
                Some(text) => Some(parse_timestamp(&text).ok_or_else(|| {
                    ChunkError::Backend(format!("invalid created_at value {text:?} for {key}"))
                })?),
                None => None,
            },
            None => None,
        };
        objects.push(ObjectSummary {
            key,
            size,
            created_at,
        });
    }
    Ok(objects)
}

impl<C: GatewayClient + 'static> ChunkStore for GatewayStore<C> {
    fn begin_write(&self) -> ChunkResult<Box<dyn ChunkTxn>> {
        Ok(Box::new(GatewayTxn {
            client: Arc::clone(&self.client),
            sql: Arc::clone(&self.sql),
        }))
    }

    fn begin_read(&self) -> ChunkResult<Box<dyn ChunkSnapshot>> {
        Ok(Box::new(GatewaySnapshot {
            client: Arc::clone(&self.client),
            sql: Arc::clone(&self.sql),
        }))
    }

    fn list_objects(&self) -> ChunkResult<Vec<ObjectSummary>> {
        let result = self.client.execute_query(&self.sql.list, &[])?;
        summaries(&result)
    }

    fn contains(&self, key: &str) -> ChunkResult<bool> {
        let params = [SqlParam::Varchar(key.to_string())];
        let result = self.client.execute_query(&self.sql.exists, &params)?;
        Ok(!result.rows.is_empty())
    }

    fn rename(&self, from: &str, to: &str) -> ChunkResult<u64> {
        let params = [
            SqlParam::Varchar(to.to_string()),
            SqlParam::Varchar(from.to_string()),
        ];
        self.client
            .execute_update(&self.sql.rename, &params)
            .map_err(|err| insert_error(err, to, 0))
    }

    fn delete(&self, key: &str) -> ChunkResult<u64> {
        let params = [SqlParam::Varchar(key.to_string())];
        Ok(self.client.execute_update(&self.sql.delete, &params)?)
    }

    fn close(&self) -> ChunkResult<()> {
        Ok(self.client.close()?)
    }
}

impl<C> std::fmt::Debug for GatewayStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayStore")
            .field("table", &self.sql.table())
            .finish_non_exhaustive()
    }
}

struct GatewayTxn<C> {
    client: Arc<C>,
    sql: Arc<TableSql>,
}

impl<C: GatewayClient> ChunkTxn for GatewayTxn<C> {
    fn insert_chunk(&mut self, chunk: &NewChunk<'_>) -> ChunkResult<()> {
        let params = [
            SqlParam::Varchar(chunk.key.to_string()),
            SqlParam::Integer(chunk.marker.code()),
            SqlParam::Integer(chunk.sequence),
            SqlParam::Blob(chunk.payload.to_vec()),
        ];
        self.client
            .execute_update(&self.sql.insert, &params)
            .map(drop)
            .map_err(|err| insert_error(err, chunk.key, chunk.sequence))
    }

    fn delete_key(&mut self, key: &str) -> ChunkResult<u64> {
        let params = [SqlParam::Varchar(key.to_string())];
        Ok(self.client.execute_update(&self.sql.delete, &params)?)
    }

    fn commit(&mut self) -> ChunkResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> ChunkResult<()> {
        debug!("gateway writes are not transactional; rows already sent remain");
        Ok(())
    }
}

struct GatewaySnapshot<C> {
    client: Arc<C>,
    sql: Arc<TableSql>,
}

impl<C: GatewayClient> ChunkSnapshot for GatewaySnapshot<C> {
    fn chunk_refs(&mut self, key: &str) -> ChunkResult<Vec<ChunkRef>> {
        let params = [SqlParam::Varchar(key.to_string())];
        let result = self.client.execute_query(&self.sql.select_refs, &params)?;
        let mut refs = Vec::with_capacity(result.rows.len());
        for row in 0..result.rows.len() {
            let id = result.integer(row, 0)?;
            let sequence = result.integer(row, 1)?;
            match (id, sequence) {
                (Some(id), Some(sequence)) => refs.push(ChunkRef { id, sequence }),
                _ => {
                    return Err(ChunkError::Backend(format!(
                        "NULL id or sequence_index for {key}"
                    )))
                }
            }
        }
        Ok(refs)
    }

    fn chunk_payload(&mut self, id: i64) -> ChunkResult<Vec<u8>> {
        let params = [SqlParam::Integer(id)];
        let result = self.client.execute_query(&self.sql.select_payload, &params)?;
        if result.rows.is_empty() {
            return Err(ChunkError::Backend(format!("chunk row {id} disappeared")));
        }
        Ok(result.bytes(0, 0)?)
    }

    fn release(&mut self) -> ChunkResult<()> {
        Ok(())
    }
}
