//! HTTP client construction and response classification
//!
//! Creates the reqwest clients used by adapters and maps transport
//! failures onto the shared failure taxonomy.

use lens_core::FailureKind;
use reqwest::{Client, Proxy, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Default User-Agent sent to providers
pub const DEFAULT_USER_AGENT: &str = concat!("threatlens/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Optional proxy URL (http://, https:// or socks5h://)
    pub proxy: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Errors from provider HTTP calls and feed downloads
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API rate limit exceeded")]
    RateLimited,

    #[error("Unauthorized (HTTP {0}): check the API key")]
    Unauthorized(u16),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl FetchError {
    /// Category of this error in the shared taxonomy
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::ClientBuild(_) | FetchError::Unauthorized(_) => {
                FailureKind::ConfigurationMissing
            }
            FetchError::Request(e) if e.is_timeout() => FailureKind::Timeout,
            FetchError::Request(e) if e.is_decode() => FailureKind::Parse,
            FetchError::Request(_) | FetchError::Status { .. } => FailureKind::TransientNetwork,
            FetchError::RateLimited => FailureKind::RateLimited,
        }
    }
}

/// Create an HTTP client for provider calls
pub fn create_http_client(config: &HttpConfig) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str());

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// Turn non-success statuses into errors, keeping a short body excerpt
pub async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(FetchError::Unauthorized(status.as_u16()))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Status {
                status: status.as_u16(),
                body: excerpt(&body, 200),
            })
        }
    }
}

/// First `max` characters of a body, on a char boundary
pub fn excerpt(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
