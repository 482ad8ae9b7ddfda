//! PhishTank adapter
//!
//! Checks URLs against the PhishTank online-valid dump. Verified
//! submissions score higher than pending ones.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use lens_core::{EnrichmentData, EnrichmentResult, IndicatorType};
use lens_feeds::{parse_phishtank_feed, FeedCache, PhishTankFeed, SharedFeedSource};

use crate::traits::to_data;
use crate::{AdapterError, ProviderAdapter, LISTED_SCORE, MIN_FEED_TTL};

pub const PHISHTANK_FEED_URL: &str = "https://data.phishtank.com/data/online-valid.json";

pub const PHISHTANK_DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Score for a submission the community has not verified yet
pub const UNVERIFIED_SCORE: f64 = 8.0;

pub struct PhishTankAdapter {
    source: SharedFeedSource,
    feed_url: String,
    cache: Arc<FeedCache<PhishTankFeed>>,
}

impl PhishTankAdapter {
    pub fn new(source: SharedFeedSource, feed_url: &str, ttl: Duration) -> Self {
        Self {
            source,
            feed_url: feed_url.to_string(),
            cache: Arc::new(FeedCache::new(ttl.max(MIN_FEED_TTL))),
        }
    }

    pub fn online_valid(source: SharedFeedSource) -> Self {
        Self::new(source, PHISHTANK_FEED_URL, PHISHTANK_DEFAULT_TTL)
    }

    pub fn cache(&self) -> &Arc<FeedCache<PhishTankFeed>> {
        &self.cache
    }

    async fn feed(&self) -> Result<Arc<PhishTankFeed>, AdapterError> {
        let source = Arc::clone(&self.source);
        let url = self.feed_url.clone();
        let feed = self
            .cache
            .get(&self.feed_url, move || async move {
                let body = source.fetch(&url).await?;
                Ok::<_, AdapterError>(parse_phishtank_feed(&body)?)
            })
            .await?;
        Ok(feed)
    }

    /// Load the dump ahead of traffic, returning the number of submissions
    pub async fn preload(&self) -> Result<usize, AdapterError> {
        Ok(self.feed().await?.len())
    }
}

#[async_trait]
impl ProviderAdapter for PhishTankAdapter {
    fn enrichment_type(&self) -> &str {
        "phishing_check"
    }

    fn provider(&self) -> &str {
        "phishtank"
    }

    fn is_applicable(&self, indicator_type: IndicatorType) -> bool {
        indicator_type == IndicatorType::Url
    }

    async fn enrich(&self, value: &str, indicator_type: IndicatorType) -> EnrichmentResult {
        if !self.is_applicable(indicator_type) {
            return self.not_applicable(indicator_type);
        }

        let feed = match self.feed().await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(indicator = %value, error = %e, "PhishTank feed unavailable");
                return self.fail_with(&e);
            }
        };

        let data = match feed.lookup(value) {
            Some(entry) => {
                debug!(indicator = %value, verified = entry.verified, "PhishTank hit");
                json!({
                    "found": true,
                    "phish_id": entry.phish_id,
                    "url": entry.url,
                    "target": entry.target,
                    "verified": entry.verified,
                    "submitted_at": entry.submitted_at,
                    "phish_detail_page": entry.detail_page(),
                })
            }
            None => json!({ "found": false, "url": value }),
        };

        self.succeed(to_data(data))
    }

    fn score_of(&self, data: &EnrichmentData) -> Option<f64> {
        if data.get("found").and_then(|v| v.as_bool()) != Some(true) {
            return None;
        }
        match data.get("verified").and_then(|v| v.as_bool()) {
            Some(true) => Some(LISTED_SCORE),
            _ => Some(UNVERIFIED_SCORE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::FailureKind;
    use lens_feeds::StaticFeedSource;

    const DUMP: &str = r#"[
        {"phish_id": 8123456, "url": "http://paypal.example.phish/login?session=1",
         "target": "PayPal", "verified": "yes"},
        {"phish_id": 8123457, "url": "http://pending.example.phish/", "verified": "no"}
    ]"#;

    fn adapter(body: &str) -> PhishTankAdapter {
        PhishTankAdapter::online_valid(Arc::new(StaticFeedSource::new(body)))
    }

    #[tokio::test]
    async fn test_verified_hit() {
        let result = adapter(DUMP)
            .enrich("http://paypal.example.phish/login?session=1", IndicatorType::Url)
            .await;
        assert!(result.success);
        assert_eq!(result.score, Some(9.0));
        assert_eq!(result.data["target"], json!("PayPal"));
    }

    #[tokio::test]
    async fn test_query_stripped_lookup_and_unverified() {
        let adapter = adapter(DUMP);

        let result = adapter
            .enrich("HTTP://PayPal.example.phish/login", IndicatorType::Url)
            .await;
        assert_eq!(result.score, Some(9.0));

        let result = adapter
            .enrich("http://pending.example.phish/", IndicatorType::Url)
            .await;
        assert_eq!(result.score, Some(8.0));
    }

    #[tokio::test]
    async fn test_miss_has_no_score() {
        let result = adapter(DUMP).enrich("http://clean.example/", IndicatorType::Url).await;
        assert!(result.success);
        assert_eq!(result.score, None);
        assert_eq!(result.data["found"], json!(false));
    }

    #[tokio::test]
    async fn test_bad_dump_fails_preload() {
        let adapter = adapter("<html>maintenance</html>");
        assert!(adapter.preload().await.is_err());

        let result = adapter.enrich("http://a.example/", IndicatorType::Url).await;
        assert_eq!(result.failure, Some(FailureKind::CacheUnavailable));
    }

    #[tokio::test]
    async fn test_domains_not_applicable() {
        let result = adapter(DUMP).enrich("paypal.example.phish", IndicatorType::Domain).await;
        assert_eq!(result.failure, Some(FailureKind::NotApplicable));
    }
}
