//! MalShare adapter - file hash lookups

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use lens_core::{EnrichmentData, EnrichmentResult, IndicatorType};
use lens_feeds::{check_status, create_http_client, FetchError, HttpConfig};

use crate::traits::to_data;
use crate::{AdapterError, ProviderAdapter, LISTED_SCORE};

const DEFAULT_BASE_URL: &str = "https://malshare.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct SampleDetails {
    md5: Option<String>,
    sha1: Option<String>,
    sha256: Option<String>,
    #[serde(rename = "F_TYPE")]
    file_type: Option<String>,
    #[serde(default)]
    source: Value,
    added: Option<Value>,
}

/// Hash algorithm implied by a hex digest length
pub fn hash_kind(hash: &str) -> Option<&'static str> {
    match hash.len() {
        32 => Some("md5"),
        40 => Some("sha1"),
        64 => Some("sha256"),
        _ => None,
    }
}

/// Presence of a sample in MalShare means it is known malware
pub struct MalShareAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl MalShareAdapter {
    pub fn new(api_key: Option<String>, http: &HttpConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_http_client(http)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn details(&self, hash: &str) -> Result<Value, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::MissingApiKey("MalShare".to_string()))?;
        let hash_type = hash_kind(hash)
            .ok_or_else(|| AdapterError::InvalidInput(format!("invalid hash length {}", hash.len())))?;

        let url = format!(
            "{}/api.php?api_key={}&action=details&hash={}",
            self.base_url,
            urlencoding::encode(api_key),
            urlencoding::encode(hash)
        );

        let response = self.client.get(&url).send().await.map_err(FetchError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(json!({
                "hash": hash,
                "hash_type": hash_type,
                "found": false,
                "message": "Hash not found in MalShare database",
            }));
        }

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(FetchError::from)?;
        let details: SampleDetails =
            serde_json::from_str(&body).map_err(|e| AdapterError::Parse(e.to_string()))?;

        Ok(json!({
            "hash": hash,
            "hash_type": hash_type,
            "found": true,
            "md5": details.md5,
            "sha1": details.sha1,
            "sha256": details.sha256,
            "file_type": details.file_type,
            "source": details.source,
            "added_date": details.added,
            "is_malware": true,
        }))
    }
}

#[async_trait]
impl ProviderAdapter for MalShareAdapter {
    fn enrichment_type(&self) -> &str {
        "hash_lookup"
    }

    fn provider(&self) -> &str {
        "malshare"
    }

    fn is_applicable(&self, indicator_type: IndicatorType) -> bool {
        indicator_type == IndicatorType::Hash
    }

    async fn enrich(&self, value: &str, indicator_type: IndicatorType) -> EnrichmentResult {
        if !self.is_applicable(indicator_type) {
            return self.not_applicable(indicator_type);
        }

        match self.details(value.trim()).await {
            Ok(data) => {
                let result = self.succeed(to_data(data));
                debug!(indicator = %value, score = ?result.score, "MalShare lookup complete");
                result
            }
            Err(e) => {
                warn!(indicator = %value, error = %e, "MalShare lookup failed");
                self.fail_with(&e)
            }
        }
    }

    fn score_of(&self, data: &EnrichmentData) -> Option<f64> {
        match data.get("found").and_then(|v| v.as_bool()) {
            Some(true) => Some(LISTED_SCORE),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::testing::serve_once;
    use lens_core::FailureKind;

    const MD5: &str = "44d88612fea8a8f36de82e1278abb02f";

    fn adapter(base: &str) -> MalShareAdapter {
        MalShareAdapter::new(Some("key".into()), &HttpConfig::default())
            .unwrap()
            .with_base_url(base)
    }

    #[test]
    fn test_hash_kind() {
        assert_eq!(hash_kind(MD5), Some("md5"));
        assert_eq!(hash_kind(&"a".repeat(64)), Some("sha256"));
        assert_eq!(hash_kind("abc"), None);
    }

    #[tokio::test]
    async fn test_invalid_length_is_parse_failure() {
        let result = adapter("http://127.0.0.1:9").enrich("abc123", IndicatorType::Hash).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Parse));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let adapter = MalShareAdapter::new(None, &HttpConfig::default()).unwrap();
        let result = adapter.enrich(MD5, IndicatorType::Hash).await;
        assert_eq!(result.failure, Some(FailureKind::ConfigurationMissing));
    }

    #[tokio::test]
    async fn test_not_found_is_success_without_score() {
        let base = serve_once(404, "").await;
        let result = adapter(&base).enrich(MD5, IndicatorType::Hash).await;
        assert!(result.success);
        assert_eq!(result.score, None);
        assert_eq!(result.data["hash_type"], json!("md5"));
    }

    #[tokio::test]
    async fn test_found_scores_high() {
        let base = serve_once(
            200,
            r#"{"MD5": "44d88612fea8a8f36de82e1278abb02f", "F_TYPE": "PE32", "SOURCE": ["http://dl.example/x.exe"], "ADDED": 1714557600}"#,
        )
        .await;
        let result = adapter(&base).enrich(MD5, IndicatorType::Hash).await;
        assert!(result.success);
        assert_eq!(result.score, Some(9.0));
        assert_eq!(result.data["file_type"], json!("PE32"));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let base = serve_once(429, "").await;
        let result = adapter(&base).enrich(MD5, IndicatorType::Hash).await;
        assert_eq!(result.failure, Some(FailureKind::RateLimited));
    }
}
