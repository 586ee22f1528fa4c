use std::sync::Mutex;

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Envelope, LoginRequest, QueryResult, SqlParam, StatementRequest};

/// Executes SQL through some gateway. Each statement is applied on its own;
/// there is no client-side transaction spanning calls.
pub trait GatewayClient: Send + Sync {
    /// Run an INSERT/UPDATE/DELETE and return the affected row count.
    fn execute_update(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<u64>;

    fn execute_query(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<QueryResult>;

    fn close(&self) -> GatewayResult<()> {
        Ok(())
    }
}

/// Where and as whom to connect.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// [`GatewayClient`] speaking the JSON protocol in [`crate::protocol`].
///
/// Logs in on first use and reuses the session id until [`close`](GatewayClient::close).
pub struct HttpGatewayClient {
    http: Client,
    config: GatewayConfig,
    session: Mutex<Option<String>>,
}

impl HttpGatewayClient {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            config,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Base URL with `segments` appended to its path.
    pub fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                GatewayError::Protocol(format!("{} cannot be a base URL", self.config.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn session_id(&self) -> GatewayResult<String> {
        let mut session = self.session.lock().expect("lock poisoned");
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }
        let url = self.endpoint(&["database", &self.config.database, "login"])?;
        let envelope = self.post(
            url,
            &LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            },
        )?;
        let id = envelope
            .session_id
            .ok_or_else(|| GatewayError::Protocol("login response without session_id".into()))?;
        info!(database = %self.config.database, "gateway session opened");
        *session = Some(id.clone());
        Ok(id)
    }

    fn statement(&self, action: &str, sql: &str, params: &[SqlParam]) -> GatewayResult<Envelope> {
        let id = self.session_id()?;
        let url = self.endpoint(&["session", &id, action])?;
        debug!(action, sql, params = params.len(), "gateway statement");
        self.post(url, &StatementRequest { sql, params })
    }

    fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> GatewayResult<Envelope> {
        let response = self.http.post(url).json(body).send()?;
        let status = response.status();
        let text = response.text()?;
        match Envelope::parse(&text) {
            Ok(envelope) => envelope.into_ok(),
            Err(_) if !status.is_success() => Err(GatewayError::Status {
                status: status.as_u16(),
                body: text,
            }),
            Err(err) => Err(err),
        }
    }
}

impl GatewayClient for HttpGatewayClient {
    fn execute_update(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<u64> {
        let envelope = self.statement("execute_update", sql, params)?;
        Ok(envelope.row_count.unwrap_or(0))
    }

    fn execute_query(&self, sql: &str, params: &[SqlParam]) -> GatewayResult<QueryResult> {
        Ok(self
            .statement("execute_query", sql, params)?
            .into_query_result())
    }

    fn close(&self) -> GatewayResult<()> {
        let Some(id) = self.session.lock().expect("lock poisoned").take() else {
            return Ok(());
        };
        let url = self.endpoint(&["session", &id, "logout"])?;
        if let Err(err) = self.post(url, &serde_json::json!({})) {
            warn!(error = %err, "gateway logout failed");
            return Err(err);
        }
        debug!("gateway session closed");
        Ok(())
    }
}

impl std::fmt::Debug for HttpGatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGatewayClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("database", &self.config.database)
            .field("username", &self.config.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpGatewayClient {
        HttpGatewayClient::new(GatewayConfig {
            base_url: Url::parse(base).unwrap(),
            database: "files".into(),
            username: "u".into(),
            password: "secret".into(),
        })
        .unwrap()
    }

    #[test]
    fn endpoints_extend_base_path() {
        let c = client("http://gw.local:9090/aceql/");
        let url = c.endpoint(&["session", "abc", "execute_query"]).unwrap();
        assert_eq!(url.as_str(), "http://gw.local:9090/aceql/session/abc/execute_query");

        let c = client("http://gw.local:9090/aceql");
        let url = c.endpoint(&["database", "files", "login"]).unwrap();
        assert_eq!(url.as_str(), "http://gw.local:9090/aceql/database/files/login");
    }

    #[test]
    fn segments_are_escaped() {
        let c = client("http://gw.local/");
        let url = c.endpoint(&["session", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://gw.local/session/a%2Fb%20c");
    }

    #[test]
    fn debug_hides_password() {
        let text = format!("{:?}", client("http://gw.local/"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn close_without_session_is_noop() {
        client("http://gw.local/").close().unwrap();
    }
}
