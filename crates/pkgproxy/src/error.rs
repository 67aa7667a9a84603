use reqwest::StatusCode;

use crate::cache::CacheError;
use crate::filter::FilterError;

// Error type for proxying a single request
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}

impl ProxyError {
    /// Status code answered to the client when this error ends a request
    /// before any response byte was sent.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
