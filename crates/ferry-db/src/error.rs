use std::fmt::Display;

use ferry_chunked::ChunkError;
use rusqlite::ffi;

/// MySQL `ER_DUP_ENTRY`.
pub const MYSQL_DUPLICATE_ENTRY: u16 = 1062;

/// Whether SQLite rejected a statement on a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// SQLSTATE `23505`.
pub fn is_postgres_unique_violation(err: &postgres::Error) -> bool {
    err.code() == Some(&postgres::error::SqlState::UNIQUE_VIOLATION)
}

pub fn is_mysql_unique_violation(err: &mysql::Error) -> bool {
    matches!(err, mysql::Error::MySqlError(server) if server.code == MYSQL_DUPLICATE_ENTRY)
}

/// Map a driver error into the codec's error space.
pub fn backend(err: impl Display) -> ChunkError {
    ChunkError::Backend(err.to_string())
}

/// Map a failure of `BEGIN`, `COMMIT` or `ROLLBACK`.
pub fn transaction(err: impl Display) -> ChunkError {
    ChunkError::Transaction(err.to_string())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    #[test]
    fn detects_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER, UNIQUE (a)); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        assert!(is_unique_violation(&err));

        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(!is_unique_violation(&err));
        assert!(matches!(backend(err), ChunkError::Backend(_)));
    }

    #[test]
    fn detects_mysql_duplicate_entry() {
        let server = |code| {
            mysql::Error::MySqlError(mysql::MySqlError {
                state: "23000".into(),
                message: "Duplicate entry 'k-0' for key 'object_key'".into(),
                code,
            })
        };
        assert!(is_mysql_unique_violation(&server(MYSQL_DUPLICATE_ENTRY)));
        // ER_NO_SUCH_TABLE
        assert!(!is_mysql_unique_violation(&server(1146)));
        assert!(matches!(
            transaction(server(1213)),
            ChunkError::Transaction(msg) if msg.contains("1213")
        ));
    }
}
