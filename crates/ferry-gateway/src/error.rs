use ferry_chunked::ChunkError;
use thiserror::Error;

/// Errors from talking to an HTTP SQL gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response without a readable error envelope.
    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway answered but refused the request or the statement.
    #[error("gateway rejected request: {message}")]
    Rejected { message: String, code: Option<i64> },

    /// The response did not have the expected shape.
    #[error("malformed gateway response: {0}")]
    Protocol(String),

    #[error("invalid gateway URL: {0}")]
    Url(#[from] url::ParseError),
}

impl GatewayError {
    /// Whether the gateway reported a UNIQUE / duplicate-key violation.
    ///
    /// Gateways forward the database's message, so this looks for the
    /// wording and codes SQLite, PostgreSQL and MySQL use.
    pub fn is_unique_violation(&self) -> bool {
        let GatewayError::Rejected { message, code } = self else {
            return false;
        };
        if matches!(code, Some(1062) | Some(23505) | Some(2067) | Some(1555)) {
            return true;
        }
        let lower = message.to_ascii_lowercase();
        lower.contains("unique")
            || lower.contains("duplicate")
            || lower.contains("23505")
            || lower.contains("1062")
    }
}

impl From<GatewayError> for ChunkError {
    fn from(err: GatewayError) -> Self {
        ChunkError::Backend(err.to_string())
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
