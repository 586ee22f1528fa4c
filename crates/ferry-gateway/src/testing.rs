//! In-process gateway over an in-memory SQLite database.
//!
//! Every statement autocommits, the same as a real gateway, and results come
//! back in wire shape: blob cells base64-encoded under a `BLOB` column type.

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use crate::client::GatewayClient;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Column, QueryResult, SqlParam};

pub struct SqliteGateway {
    conn: Mutex<Connection>,
    fail_queries: Mutex<bool>,
    queries: Mutex<Vec<String>>,
}

impl SqliteGateway {
    pub fn new() -> Self {
        Self {
            conn: Mutex::new(Connection::open_in_memory().unwrap()),
            fail_queries: Mutex::new(false),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn execute_batch(&self, sql: &str) {
        self.conn.lock().unwrap().execute_batch(sql).unwrap();
    }

    pub fn row_count(&self) -> i64 {
        self.conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM object_chunks", [], |row| row.get(0))
            .unwrap()
    }

    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }

    /// Query statements received so far, oldest first.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn bind(params: &[SqlParam]) -> Vec<SqlValue> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Varchar(s) => SqlValue::Text(s.clone()),
            SqlParam::Integer(i) => SqlValue::Integer(*i),
            SqlParam::Blob(b) => SqlValue::Blob(b.clone()),
        })
        .collect()
}

fn rejected(err: rusqlite::Error) -> GatewayError {
    GatewayError::Rejected {
        message: err.to_string(),
        code: None,
    }
}

impl GatewayClient for SqliteGateway {
    fn execute_update(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<u64> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(sql, params_from_iter(bind(params)))
            .map_err(rejected)?;
        Ok(rows as u64)
    }

    fn execute_query(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<QueryResult> {
        self.queries.lock().unwrap().push(sql.to_string());
        if *self.fail_queries.lock().unwrap() {
            return Err(GatewayError::Status {
                status: 503,
                body: "gateway unavailable".into(),
            });
        }
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(rejected)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let width = names.len();
        let raw: Vec<Vec<SqlValue>> = stmt
            .query_map(
                params_from_iter(bind(params)),
                |row| -> rusqlite::Result<Vec<SqlValue>> {
                    (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
                },
            )
            .map_err(rejected)?
            .collect::<Result<_, _>>()
            .map_err(rejected)?;

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let kind = if raw.iter().any(|row| matches!(row[i], SqlValue::Blob(_))) {
                    "BLOB"
                } else if raw.iter().any(|row| matches!(row[i], SqlValue::Integer(_))) {
                    "INTEGER"
                } else {
                    "VARCHAR"
                };
                Column::new(name, kind)
            })
            .collect();
        let rows = raw
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        SqlValue::Null => Value::Null,
                        SqlValue::Integer(i) => Value::from(i),
                        SqlValue::Real(f) => Value::from(f),
                        SqlValue::Text(s) => Value::String(s),
                        SqlValue::Blob(b) => Value::String(STANDARD.encode(b)),
                    })
                    .collect()
            })
            .collect();
        Ok(QueryResult { columns, rows })
    }
}
