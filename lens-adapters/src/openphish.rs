//! OpenPhish adapter - community phishing feed
//!
//! The feed is a plain URL list downloaded in bulk and kept in a
//! [`FeedCache`]; lookups never hit the network while it is fresh.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use lens_core::{EnrichmentData, EnrichmentResult, IndicatorType};
use lens_feeds::{parse_url_feed, FeedCache, SharedFeedSource, UrlFeed};

use crate::traits::to_data;
use crate::{AdapterError, ProviderAdapter, LISTED_SCORE, MIN_FEED_TTL};

/// Public community feed
pub const OPENPHISH_FEED_URL: &str = "https://openphish.com/feed.txt";

/// Default refresh interval for the community feed
pub const OPENPHISH_DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Flags URLs and domains present in the OpenPhish feed
pub struct OpenPhishAdapter {
    source: SharedFeedSource,
    feed_url: String,
    cache: Arc<FeedCache<UrlFeed>>,
}

impl OpenPhishAdapter {
    pub fn new(source: SharedFeedSource, feed_url: &str, ttl: Duration) -> Self {
        Self {
            source,
            feed_url: feed_url.to_string(),
            cache: Arc::new(FeedCache::new(ttl.max(MIN_FEED_TTL))),
        }
    }

    /// Adapter over the public feed with the default TTL
    pub fn community(source: SharedFeedSource) -> Self {
        Self::new(source, OPENPHISH_FEED_URL, OPENPHISH_DEFAULT_TTL)
    }

    pub fn cache(&self) -> &Arc<FeedCache<UrlFeed>> {
        &self.cache
    }

    async fn feed(&self) -> Result<Arc<UrlFeed>, AdapterError> {
        let source = Arc::clone(&self.source);
        let url = self.feed_url.clone();
        let feed = self
            .cache
            .get(&self.feed_url, move || async move {
                let body = source.fetch(&url).await?;
                Ok::<_, AdapterError>(parse_url_feed(&body)?)
            })
            .await?;
        Ok(feed)
    }

    /// Load the feed ahead of traffic, returning its size
    pub async fn preload(&self) -> Result<usize, AdapterError> {
        Ok(self.feed().await?.len())
    }
}

#[async_trait]
impl ProviderAdapter for OpenPhishAdapter {
    fn enrichment_type(&self) -> &str {
        "phishing_check"
    }

    fn provider(&self) -> &str {
        "openphish"
    }

    fn is_applicable(&self, indicator_type: IndicatorType) -> bool {
        matches!(indicator_type, IndicatorType::Url | IndicatorType::Domain)
    }

    async fn enrich(&self, value: &str, indicator_type: IndicatorType) -> EnrichmentResult {
        if !self.is_applicable(indicator_type) {
            return self.not_applicable(indicator_type);
        }

        let feed = match self.feed().await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(indicator = %value, error = %e, "OpenPhish feed unavailable");
                return self.fail_with(&e);
            }
        };

        let listed = match indicator_type {
            IndicatorType::Domain => feed.mentions_domain(value),
            _ => feed.contains_url(value),
        };
        debug!(indicator = %value, listed, "OpenPhish lookup");

        let message = if listed {
            "Present in OpenPhish community phishing feed"
        } else {
            "Not present in OpenPhish community feed at last refresh"
        };

        self.succeed(to_data(json!({
            "indicator": value,
            "indicator_type": indicator_type,
            "listed": listed,
            "feed": self.feed_url,
            "cache_fetched_at": self.cache.fetched_at(&self.feed_url),
            "cache_size": feed.len(),
            "message": message,
        })))
    }

    fn score_of(&self, data: &EnrichmentData) -> Option<f64> {
        match data.get("listed").and_then(|v| v.as_bool()) {
            Some(true) => Some(LISTED_SCORE),
            _ => None,
        }
    }
}
