use crate::error::{ChunkError, ChunkResult};

/// SQL flavor of a chunk table's database.
///
/// Decides the DDL, the placeholder style and how the listing query casts
/// its aggregate columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Guess the dialect from a driver name such as `sqlite3` or `postgres`.
    pub fn from_driver(driver: &str) -> Option<Self> {
        let driver = driver.to_ascii_lowercase();
        if driver.starts_with("sqlite") {
            Some(Dialect::Sqlite)
        } else if driver.starts_with("postgres") || driver == "pgx" || driver == "pg" {
            Some(Dialect::Postgres)
        } else if driver.starts_with("mysql") || driver.starts_with("mariadb") {
            Some(Dialect::Mysql)
        } else {
            None
        }
    }

    /// Placeholder for the `n`th parameter, counting from 1.
    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }
}

/// Statement templates for one chunk table.
///
/// Placeholders are positional: `?` for SQLite, MySQL and the gateway,
/// `$1, $2, ...` for PostgreSQL. The table name is validated once at
/// construction because it is the only part spliced into SQL text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSql {
    table: String,
    dialect: Dialect,
    /// `(object_key, marker, sequence_index, payload)`
    pub insert: String,
    /// `(object_key)` -> rows of `(id, sequence_index)` ascending
    pub select_refs: String,
    /// `(id)` -> one `payload`
    pub select_payload: String,
    /// rows of `(object_key, size, created_at)`: total payload bytes and
    /// newest row time per key
    pub list: String,
    /// `(object_key)` -> a row when the object exists
    pub exists: String,
    /// `(new_key, old_key)`
    pub rename: String,
    /// `(object_key)`
    pub delete: String,
}

impl TableSql {
    pub const DEFAULT_TABLE: &'static str = "object_chunks";

    /// Statements in the portable `?` flavor, as SQLite and the gateway take them.
    pub fn new(table: &str) -> ChunkResult<Self> {
        Self::with_dialect(table, Dialect::Sqlite)
    }

    pub fn with_dialect(table: &str, dialect: Dialect) -> ChunkResult<Self> {
        if !is_identifier(table) {
            return Err(ChunkError::InvalidTable(table.to_string()));
        }
        Ok(Self::build(table, dialect))
    }

    fn build(table: &str, dialect: Dialect) -> Self {
        let p = |n| dialect.placeholder(n);
        // Aggregates come back as DECIMAL on MySQL and as native timestamps on
        // PostgreSQL; cast them to the integer and text cells every store reads.
        let (size, created) = match dialect {
            Dialect::Sqlite => (
                "SUM(LENGTH(payload))".to_string(),
                "MAX(created_at)".to_string(),
            ),
            Dialect::Postgres => (
                "CAST(SUM(LENGTH(payload)) AS BIGINT)".to_string(),
                "CAST(MAX(created_at) AS TEXT)".to_string(),
            ),
            Dialect::Mysql => (
                "CAST(SUM(LENGTH(payload)) AS SIGNED)".to_string(),
                "CAST(MAX(created_at) AS CHAR)".to_string(),
            ),
        };
        Self {
            table: table.to_string(),
            dialect,
            insert: format!(
                "INSERT INTO {table} (object_key, marker, sequence_index, payload, created_at) \
                 VALUES ({}, {}, {}, {}, CURRENT_TIMESTAMP)",
                p(1),
                p(2),
                p(3),
                p(4)
            ),
            select_refs: format!(
                "SELECT id, sequence_index FROM {table} WHERE object_key = {} ORDER BY sequence_index",
                p(1)
            ),
            select_payload: format!("SELECT payload FROM {table} WHERE id = {}", p(1)),
            list: format!(
                "SELECT object_key, {size} AS size, {created} AS created_at \
                 FROM {table} \
                 GROUP BY object_key ORDER BY object_key"
            ),
            exists: format!("SELECT 1 FROM {table} WHERE object_key = {} LIMIT 1", p(1)),
            rename: format!(
                "UPDATE {table} SET object_key = {} WHERE object_key = {}",
                p(1),
                p(2)
            ),
            delete: format!("DELETE FROM {table} WHERE object_key = {}", p(1)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// `CREATE TABLE IF NOT EXISTS` for the chunk layout, including the
    /// `(object_key, sequence_index)` uniqueness the codec depends on.
    pub fn create_table(&self) -> String {
        let (id, blob) = match self.dialect {
            Dialect::Sqlite => ("id INTEGER PRIMARY KEY AUTOINCREMENT", "BLOB"),
            Dialect::Postgres => ("id BIGSERIAL PRIMARY KEY", "BYTEA"),
            Dialect::Mysql => ("id BIGINT AUTO_INCREMENT PRIMARY KEY", "LONGBLOB"),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    {id},\n    object_key VARCHAR(200) NOT NULL,\n    marker INTEGER NOT NULL,\n    sequence_index INTEGER NOT NULL,\n    payload {blob},\n    created_at TIMESTAMP,\n    UNIQUE (object_key, sequence_index)\n)",
            table = self.table,
        )
    }
}

impl Default for TableSql {
    fn default() -> Self {
        Self::build(Self::DEFAULT_TABLE, Dialect::Sqlite)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
