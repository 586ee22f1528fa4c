use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported backend: {0}")]
    Unsupported(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("session error: {0}")]
    Session(#[from] ferry_session::SessionError),

    #[error("chunk store error: {0}")]
    Chunk(#[from] ferry_chunked::ChunkError),

    #[error("gateway error: {0}")]
    Gateway(#[from] ferry_gateway::GatewayError),
}

impl SdkError {
    pub(crate) fn invalid(url: &str, reason: impl Into<String>) -> Self {
        SdkError::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
