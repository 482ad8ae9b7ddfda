//! Common contract for provider adapters

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use lens_core::{adapter_key, EnrichmentData, EnrichmentResult, FailureKind, IndicatorType};
use lens_feeds::{CacheError, FeedParseError, FetchError};

/// Errors raised inside an adapter before they become failed results
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0} API key not configured")]
    MissingApiKey(String),

    #[error("Invalid indicator: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Malformed response: {0}")]
    Parse(String),
}

impl AdapterError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AdapterError::MissingApiKey(_) => FailureKind::ConfigurationMissing,
            AdapterError::InvalidInput(_) | AdapterError::Parse(_) => FailureKind::Parse,
            AdapterError::Fetch(e) => e.failure_kind(),
            AdapterError::Cache(e) => e.failure_kind(),
        }
    }
}

impl From<FeedParseError> for AdapterError {
    fn from(e: FeedParseError) -> Self {
        AdapterError::Parse(e.to_string())
    }
}

/// A pluggable enrichment source
///
/// `enrich` never panics by contract: every failure is reported as a
/// result with `success = false` and a [`FailureKind`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Kind of enrichment (ip_reputation, phishing_check, hash_lookup)
    fn enrichment_type(&self) -> &str;

    /// Provider name
    fn provider(&self) -> &str;

    /// Registry key, `enrichment_type:provider`
    fn key(&self) -> String {
        adapter_key(self.enrichment_type(), self.provider())
    }

    /// Whether this adapter handles the indicator type
    fn is_applicable(&self, indicator_type: IndicatorType) -> bool;

    /// Query the provider for one indicator value
    async fn enrich(&self, value: &str, indicator_type: IndicatorType) -> EnrichmentResult;

    /// Normalized 0-10 score for a payload, `None` when there is no risk signal
    fn score_of(&self, data: &EnrichmentData) -> Option<f64>;

    fn succeed(&self, data: EnrichmentData) -> EnrichmentResult {
        let score = self.score_of(&data);
        EnrichmentResult::success(self.enrichment_type(), self.provider(), data, score)
    }

    fn fail(&self, kind: FailureKind, message: &str) -> EnrichmentResult {
        EnrichmentResult::failure(self.enrichment_type(), self.provider(), kind, message)
    }

    fn fail_with(&self, err: &AdapterError) -> EnrichmentResult {
        self.fail(err.failure_kind(), &err.to_string())
    }

    fn not_applicable(&self, indicator_type: IndicatorType) -> EnrichmentResult {
        self.fail(
            FailureKind::NotApplicable,
            &format!("{} not applicable for {}", self.provider(), indicator_type),
        )
    }
}

/// Thread-safe reference to an adapter
pub type SharedAdapter = Arc<dyn ProviderAdapter>;

/// Convert a serializable payload into result data
pub(crate) fn to_data(value: serde_json::Value) -> EnrichmentData {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = EnrichmentData::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
