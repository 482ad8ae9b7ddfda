//! Feed sources - where bulk datasets come from
//!
//! Feed-based adapters never download per indicator; they ask a
//! [`FeedSource`] for the whole dataset through the feed cache.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use crate::{check_status, create_http_client, FetchError, HttpConfig};

/// Something that can download a feed body
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Download the raw feed body
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Thread-safe reference to a feed source
pub type SharedFeedSource = Arc<dyn FeedSource>;

/// Feed source backed by HTTP GET
pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_http_client(config)?,
        })
    }

    pub fn shared(config: &HttpConfig) -> Result<SharedFeedSource, FetchError> {
        Ok(Arc::new(Self::new(config)?))
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!(feed = %url, "Downloading feed");

        let response = self
            .client
            .get(url)
            .header("Accept", "text/plain,application/json,*/*")
            .send()
            .await?;

        let body = check_status(response).await?.text().await?;

        debug!(feed = %url, bytes = body.len(), "Feed downloaded");
        Ok(body)
    }
}

/// Feed source serving a fixed body, for offline runs and tests
pub struct StaticFeedSource {
    body: String,
}

impl StaticFeedSource {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        Ok(self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source: SharedFeedSource = Arc::new(StaticFeedSource::new("http://a.example/\n"));
        let body = source.fetch("ignored").await.unwrap();
        assert_eq!(body, "http://a.example/\n");
    }

    #[test]
    fn test_http_source_builds() {
        assert!(HttpFeedSource::new(&HttpConfig::default()).is_ok());
    }
}
