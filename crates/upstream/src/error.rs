//! Upstream client error types.

use thiserror::Error;

/// Errors raised while building an upstream client or fetching a page.
///
/// [`PhotoSource::fetch_page`](crate::PhotoSource::fetch_page) never returns
/// these; it logs them and degrades to an empty page.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {0}")]
    Status(reqwest::StatusCode),

    #[error("undecodable body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpstreamError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http",
            Self::Status(_) => "status",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
