//! Wire format of the SQL gateway.
//!
//! Every call is a JSON `POST`; every answer is an envelope with
//! `"status": "OK"` or `"status": "FAIL"` plus an `error_message`.
//!
//! | endpoint                          | body                    | answer          |
//! |-----------------------------------|-------------------------|-----------------|
//! | `database/{db}/login`             | `{username, password}`  | `session_id`    |
//! | `session/{id}/execute_update`     | `{sql, params}`         | `row_count`     |
//! | `session/{id}/execute_query`      | `{sql, params}`         | `columns, rows` |
//! | `session/{id}/logout`             | `{}`                    |                 |
//!
//! Blob parameters and blob result cells travel base64-encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlParam {
    Varchar(String),
    Integer(i64),
    Blob(#[serde(with = "base64_bytes")] Vec<u8>),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatementRequest<'a> {
    pub sql: &'a str,
    pub params: &'a [SqlParam],
}

/// Declared column of a query result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self.kind.to_ascii_uppercase().as_str(),
            "BLOB" | "BINARY" | "VARBINARY" | "LONGVARBINARY" | "BYTEA"
        )
    }
}

/// Rows returned by `execute_query`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Integer cell; gateways may send numbers as JSON numbers or strings.
    pub fn integer(&self, row: usize, column: usize) -> GatewayResult<Option<i64>> {
        match self.cell(row, column)? {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| GatewayError::Protocol(format!("{n} is not an integer"))),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| GatewayError::Protocol(format!("{s:?} is not an integer"))),
            other => Err(GatewayError::Protocol(format!("{other} is not an integer"))),
        }
    }

    /// Byte cell, base64-decoded when the column is binary.
    pub fn bytes(&self, row: usize, column: usize) -> GatewayResult<Vec<u8>> {
        let binary = self.columns.get(column).is_some_and(Column::is_binary);
        match self.cell(row, column)? {
            Value::Null => Ok(Vec::new()),
            Value::String(s) if binary => STANDARD
                .decode(s)
                .map_err(|e| GatewayError::Protocol(format!("bad base64 payload: {e}"))),
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Err(GatewayError::Protocol(format!("{other} is not a byte value"))),
        }
    }

    /// Cell rendered as text; `None` for SQL NULL.
    pub fn text(&self, row: usize, column: usize) -> GatewayResult<Option<String>> {
        Ok(match self.cell(row, column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    fn cell(&self, row: usize, column: usize) -> GatewayResult<&Value> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .ok_or_else(|| GatewayError::Protocol(format!("no cell at row {row}, column {column}")))
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl Envelope {
    pub fn parse(body: &str) -> GatewayResult<Self> {
        serde_json::from_str(body).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    /// Turn a `FAIL` envelope into [`GatewayError::Rejected`].
    pub fn into_ok(self) -> GatewayResult<Self> {
        if self.status.eq_ignore_ascii_case("OK") {
            return Ok(self);
        }
        Err(GatewayError::Rejected {
            message: self
                .error_message
                .unwrap_or_else(|| format!("status {}", self.status)),
            code: self.error_code,
        })
    }

    pub fn into_query_result(self) -> QueryResult {
        QueryResult {
            columns: self.columns,
            rows: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn params_serialize_tagged() {
        let params = vec![
            SqlParam::Varchar("a.txt".into()),
            SqlParam::Integer(-1),
            SqlParam::Blob(vec![0, 255]),
        ];
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "VARCHAR", "value": "a.txt"},
                {"type": "INTEGER", "value": -1},
                {"type": "BLOB", "value": "AP8="},
            ])
        );
        let back: Vec<SqlParam> = serde_json::from_value(value).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn fail_envelope_is_rejected() {
        let body = r#"{"status":"FAIL","error_message":"UNIQUE constraint failed","error_code":2067}"#;
        let err = Envelope::parse(body).unwrap().into_ok().unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn query_cells_decode() {
        let body = json!({
            "status": "OK",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "payload", "type": "BLOB"},
                {"name": "note", "type": "VARCHAR"}
            ],
            "rows": [[7, "aGk=", null], ["8", null, "x"]]
        })
        .to_string();
        let result = Envelope::parse(&body).unwrap().into_ok().unwrap().into_query_result();
        assert_eq!(result.column_index("PAYLOAD"), Some(1));
        assert_eq!(result.integer(0, 0).unwrap(), Some(7));
        assert_eq!(result.integer(1, 0).unwrap(), Some(8));
        assert_eq!(result.bytes(0, 1).unwrap(), b"hi");
        assert!(result.bytes(1, 1).unwrap().is_empty());
        assert_eq!(result.text(0, 2).unwrap(), None);
        assert!(result.integer(5, 0).is_err());
    }

    #[test]
    fn garbage_body_is_protocol_error() {
        assert!(matches!(
            Envelope::parse("<html>"),
            Err(GatewayError::Protocol(_))
        ));
    }
}
