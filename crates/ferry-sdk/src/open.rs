use std::path::PathBuf;
use std::str::FromStr;

use ferry_chunked::{ChunkConfig, ChunkedSession, Dialect, TableSql};
use ferry_db::{MysqlStore, PostgresStore, ServerOptions, SqliteOptions, SqliteStore};
use ferry_gateway::{GatewayConfig, GatewayStore, HttpGatewayClient};
use ferry_remote::{FtpClient, FtpOptions, SftpClient, SftpOptions};
use ferry_session::{LocalSession, Session};
use mysql::{Opts, OptsBuilder};
use tracing::{info, warn};
use url::{form_urlencoded, Url};

use crate::error::{SdkError, SdkResult};

const FTP_PORT: u16 = 21;
const SSH_PORT: u16 = 22;

/// A parsed backend URL.
///
/// | form | backend |
/// |------|---------|
/// | `/some/dir`, `file:///some/dir` | local directory |
/// | `db+sqlite://<path>?table=..&chunk_size=..&create_table=true` | SQLite chunk table |
/// | `db+postgres://user:pw@host/db?table=..` | PostgreSQL chunk table |
/// | `db+mysql://user:pw@host/db?table=..` | MySQL chunk table |
/// | `db+http(s)://host/base?database=..&table=..&chunk_size=..` | HTTP SQL gateway |
/// | `ftp://[user@]host[:port]/dir?epsv=false` | FTP server, rooted at `dir` |
/// | `sftp://[user@]host[:port]/dir`, `ssh://..` | SFTP server |
///
/// `sc_dbtable`, `sc_max_size` and `sc_dbname` are accepted as older
/// spellings of `table`, `chunk_size` and `database`. Other parameters on
/// PostgreSQL and MySQL URLs are handed to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Local {
        root: PathBuf,
    },
    Sqlite {
        path: PathBuf,
        table: String,
        chunk_size: Option<usize>,
        create_table: bool,
    },
    Postgres {
        /// Driver connection URL, ferry parameters removed.
        url: Url,
        table: String,
        chunk_size: Option<usize>,
        create_table: bool,
    },
    Mysql {
        url: Url,
        table: String,
        chunk_size: Option<usize>,
        create_table: bool,
    },
    Gateway {
        base_url: Url,
        database: String,
        table: String,
        chunk_size: Option<usize>,
    },
    Ftp {
        address: String,
        username: String,
        root_dir: String,
        disable_epsv: bool,
    },
    Sftp {
        address: String,
        username: String,
        remote_dir: String,
    },
}

#[derive(Default)]
struct QueryParams {
    table: Option<String>,
    chunk_size: Option<usize>,
    database: Option<String>,
    create_table: bool,
    epsv: Option<bool>,
    /// Parameters ferry does not know, in URL order.
    extra: Vec<(String, String)>,
}

fn parse_bool(url: &str, name: &str, value: &str) -> SdkResult<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(SdkError::invalid(
            url,
            format!("{name} {other:?} is not a boolean"),
        )),
    }
}

impl QueryParams {
    fn parse(url: &str, query: &str) -> SdkResult<Self> {
        let mut params = QueryParams::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "table" | "sc_dbtable" => params.table = Some(value.into_owned()),
                "database" | "sc_dbname" => params.database = Some(value.into_owned()),
                "chunk_size" | "sc_max_size" => {
                    let size = value.parse::<usize>().map_err(|_| {
                        SdkError::invalid(url, format!("chunk_size {value:?} is not a byte count"))
                    })?;
                    params.chunk_size = Some(size);
                }
                "create_table" => params.create_table = parse_bool(url, "create_table", &value)?,
                "epsv" => params.epsv = Some(parse_bool(url, "epsv", &value)?),
                _ => params.extra.push((key.into_owned(), value.into_owned())),
            }
        }
        Ok(params)
    }

    fn table(&mut self) -> String {
        self.table
            .take()
            .unwrap_or_else(|| TableSql::DEFAULT_TABLE.to_string())
    }

    fn warn_unused(&self) {
        for (param, _) in &self.extra {
            warn!(param = %param, "ignoring unknown url parameter");
        }
        if self.epsv.is_some() {
            warn!("epsv only applies to ftp urls");
        }
    }
}

/// Split a parsed server URL into `(host:port, username)`.
fn server_address(url: &str, parsed: &Url, default_port: u16) -> SdkResult<(String, String)> {
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SdkError::invalid(url, "missing host"))?;
    let port = parsed.port().unwrap_or(default_port);
    Ok((format!("{host}:{port}"), parsed.username().to_string()))
}

/// The URL path as a directory, `""` when it names the login directory.
fn url_dir(parsed: &Url) -> String {
    match parsed.path() {
        "" | "/" => String::new(),
        dir => dir.trim_end_matches('/').to_string(),
    }
}

impl Target {
    pub fn parse(url: &str) -> SdkResult<Self> {
        if url.is_empty() {
            return Err(SdkError::invalid(url, "empty url"));
        }

        if let Some(rest) = url.strip_prefix("db+") {
            return Self::parse_database(url, rest);
        }

        if !url.contains("://") {
            return Ok(Target::Local {
                root: PathBuf::from(url),
            });
        }

        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "file" => {
                let root = parsed
                    .to_file_path()
                    .map_err(|()| SdkError::invalid(url, "not a local file path"))?;
                Ok(Target::Local { root })
            }
            "ftp" => {
                let (address, username) = server_address(url, &parsed, FTP_PORT)?;
                let mut params = QueryParams::parse(url, parsed.query().unwrap_or(""))?;
                let disable_epsv = !params.epsv.take().unwrap_or(true);
                params.warn_unused();
                Ok(Target::Ftp {
                    address,
                    username,
                    root_dir: url_dir(&parsed),
                    disable_epsv,
                })
            }
            "sftp" | "ssh" => {
                let (address, username) = server_address(url, &parsed, SSH_PORT)?;
                QueryParams::parse(url, parsed.query().unwrap_or(""))?.warn_unused();
                Ok(Target::Sftp {
                    address,
                    username,
                    remote_dir: url_dir(&parsed),
                })
            }
            scheme => Err(SdkError::Unsupported(format!("url scheme {scheme:?}"))),
        }
    }

    /// `rest` is the URL after `db+`.
    fn parse_database(url: &str, rest: &str) -> SdkResult<Self> {
        if rest.starts_with("http://") || rest.starts_with("https://") {
            let mut base_url = Url::parse(rest)?;
            let mut params = QueryParams::parse(url, base_url.query().unwrap_or(""))?;
            base_url.set_query(None);
            if params.create_table {
                warn!("create_table has no effect for gateway urls");
            }
            params.warn_unused();
            let database = params
                .database
                .take()
                .filter(|db| !db.is_empty())
                .ok_or_else(|| SdkError::invalid(url, "gateway urls need a database parameter"))?;
            return Ok(Target::Gateway {
                base_url,
                database,
                table: params.table(),
                chunk_size: params.chunk_size,
            });
        }

        let (driver, location) = rest
            .split_once("://")
            .ok_or_else(|| SdkError::invalid(url, "missing driver separator \"://\""))?;
        let dialect = Dialect::from_driver(driver)
            .ok_or_else(|| SdkError::Unsupported(format!("database driver {driver:?}")))?;

        if dialect == Dialect::Sqlite {
            let (path, query) = location.split_once('?').unwrap_or((location, ""));
            if path.is_empty() {
                return Err(SdkError::invalid(url, "missing database file path"));
            }
            let mut params = QueryParams::parse(url, query)?;
            if params.database.is_some() {
                warn!("database parameter has no effect for sqlite urls");
            }
            params.warn_unused();
            return Ok(Target::Sqlite {
                path: PathBuf::from(path),
                table: params.table(),
                chunk_size: params.chunk_size,
                create_table: params.create_table,
            });
        }

        let scheme = match dialect {
            Dialect::Postgres => "postgresql",
            _ => "mysql",
        };
        let mut conn_url = Url::parse(&format!("{scheme}://{location}"))?;
        let mut params = QueryParams::parse(url, conn_url.query().unwrap_or(""))?;
        if params.database.is_some() {
            warn!("database parameter has no effect here; name the database in the url path");
        }
        if params.epsv.is_some() {
            warn!("epsv only applies to ftp urls");
        }
        if params.extra.is_empty() {
            conn_url.set_query(None);
        } else {
            conn_url
                .query_pairs_mut()
                .clear()
                .extend_pairs(params.extra.iter());
        }
        let table = params.table();
        let chunk_size = params.chunk_size;
        let create_table = params.create_table;

        if dialect == Dialect::Postgres {
            postgres::Config::from_str(conn_url.as_str())
                .map_err(|e| SdkError::invalid(url, e.to_string()))?;
            Ok(Target::Postgres {
                url: conn_url,
                table,
                chunk_size,
                create_table,
            })
        } else {
            Opts::from_url(conn_url.as_str()).map_err(|e| SdkError::invalid(url, e.to_string()))?;
            Ok(Target::Mysql {
                url: conn_url,
                table,
                chunk_size,
                create_table,
            })
        }
    }
}

/// Credentials and defaults used when a URL leaves them out.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    username: String,
    password: String,
    max_chunk_size: Option<usize>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials for servers that need a login. A non-empty username
    /// replaces the one in the URL.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Chunk size for backends whose URL has no `chunk_size`.
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = Some(size);
        self
    }

    /// Open the backend `url` points at. Returns the session and the remote
    /// base directory relative paths should be resolved against.
    pub fn open(&self, url: &str) -> SdkResult<(Box<dyn Session>, String)> {
        let target = Target::parse(url)?;
        let base = match &target {
            Target::Sftp { remote_dir, .. } => remote_dir.clone(),
            _ => String::new(),
        };
        let session = self.connect(target)?;
        Ok((session, base))
    }

    fn chunk_config(&self, from_url: Option<usize>) -> ChunkConfig {
        from_url
            .or(self.max_chunk_size)
            .map(ChunkConfig::new)
            .unwrap_or_default()
    }

    fn username_or(&self, from_url: String) -> String {
        if self.username.is_empty() {
            from_url
        } else {
            self.username.clone()
        }
    }

    fn postgres_config(&self, url: &Url) -> SdkResult<postgres::Config> {
        let mut config = postgres::Config::from_str(url.as_str())
            .map_err(|e| SdkError::invalid(url.as_str(), e.to_string()))?;
        if !self.username.is_empty() {
            config.user(&self.username);
        }
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        Ok(config)
    }

    fn mysql_opts(&self, url: &Url) -> SdkResult<Opts> {
        let opts =
            Opts::from_url(url.as_str()).map_err(|e| SdkError::invalid(url.as_str(), e.to_string()))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if !self.username.is_empty() {
            builder = builder.user(Some(&self.username));
        }
        if !self.password.is_empty() {
            builder = builder.pass(Some(&self.password));
        }
        Ok(Opts::from(builder))
    }

    fn connect(&self, target: Target) -> SdkResult<Box<dyn Session>> {
        match target {
            Target::Local { root } => {
                info!(root = %root.display(), "opening local session");
                Ok(Box::new(LocalSession::new(root)))
            }
            Target::Sqlite {
                path,
                table,
                chunk_size,
                create_table,
            } => {
                let options = SqliteOptions {
                    table: TableSql::new(&table)?,
                    create_table,
                    ..SqliteOptions::default()
                };
                let store = SqliteStore::open(path, options)?;
                Ok(Box::new(ChunkedSession::new(store, self.chunk_config(chunk_size))))
            }
            Target::Postgres {
                url,
                table,
                chunk_size,
                create_table,
            } => {
                let config = self.postgres_config(&url)?;
                let store = PostgresStore::connect(config, ServerOptions { table, create_table })?;
                Ok(Box::new(ChunkedSession::new(store, self.chunk_config(chunk_size))))
            }
            Target::Mysql {
                url,
                table,
                chunk_size,
                create_table,
            } => {
                let opts = self.mysql_opts(&url)?;
                let store = MysqlStore::connect(opts, ServerOptions { table, create_table })?;
                Ok(Box::new(ChunkedSession::new(store, self.chunk_config(chunk_size))))
            }
            Target::Gateway {
                base_url,
                database,
                table,
                chunk_size,
            } => {
                let sql = TableSql::new(&table)?;
                info!(url = %base_url, database = %database, table = %table, "opening gateway session");
                let client = HttpGatewayClient::new(GatewayConfig {
                    base_url,
                    database,
                    username: self.username.clone(),
                    password: self.password.clone(),
                })?;
                let store = GatewayStore::new(client, sql);
                Ok(Box::new(ChunkedSession::new(store, self.chunk_config(chunk_size))))
            }
            Target::Ftp {
                address,
                username,
                root_dir,
                disable_epsv,
            } => {
                let session = FtpClient::open(&FtpOptions {
                    address,
                    username: self.username_or(username),
                    password: self.password.clone(),
                    root_dir,
                    disable_epsv,
                })?;
                Ok(Box::new(session))
            }
            Target::Sftp {
                address,
                username,
                remote_dir: _,
            } => {
                let session = SftpClient::open(&SftpOptions {
                    address,
                    username: self.username_or(username),
                    password: self.password.clone(),
                })?;
                Ok(Box::new(session))
            }
        }
    }
}

/// Open `url` with the given credentials. See [`Target`] for the URL forms.
pub fn open(url: &str, username: &str, password: &str) -> SdkResult<(Box<dyn Session>, String)> {
    OpenOptions::new().credentials(username, password).open(url)
}
