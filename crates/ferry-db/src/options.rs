use ferry_chunked::TableSql;

/// Options shared by the PostgreSQL and MySQL stores.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Chunk table name; statements are rendered for the server's dialect.
    pub table: String,
    /// Run `CREATE TABLE IF NOT EXISTS` on connect.
    pub create_table: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            table: TableSql::DEFAULT_TABLE.to_string(),
            create_table: false,
        }
    }
}
