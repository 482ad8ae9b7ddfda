//! Enrichment results produced by provider adapters
//!
//! Every adapter invocation yields exactly one result:
//! - Success with a normalized score (risk evidence found)
//! - Success without a score (ran fine, no risk signal)
//! - Failure carrying a [`FailureKind`] and a human readable message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::clamp_score;

/// Opaque provider-specific payload attached to a result
pub type EnrichmentData = Map<String, Value>;

/// Why an adapter invocation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Adapter invoked for an indicator type it does not handle
    NotApplicable,
    /// Required credential or setting is absent
    ConfigurationMissing,
    /// Connection failure or unexpected server status
    TransientNetwork,
    /// Provider asked us to back off
    RateLimited,
    /// Attempt exceeded its deadline
    Timeout,
    /// Provider returned malformed data
    Parse,
    /// Bulk feed has never been fetched successfully
    CacheUnavailable,
    /// Adapter task died before producing a result
    Internal,
}

impl FailureKind {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::TransientNetwork
                | FailureKind::RateLimited
                | FailureKind::Timeout
                | FailureKind::Internal
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotApplicable => "not_applicable",
            FailureKind::ConfigurationMissing => "configuration_missing",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::Parse => "parse",
            FailureKind::CacheUnavailable => "cache_unavailable",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Build the `type:provider` key identifying an adapter
pub fn adapter_key(enrichment_type: &str, provider: &str) -> String {
    format!("{}:{}", enrichment_type, provider)
}

/// Outcome of one adapter invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// `enrichment_type:provider`
    pub adapter_key: String,
    /// Kind of enrichment (ip_reputation, phishing_check, ...)
    pub enrichment_type: String,
    /// Provider name (abuseipdb, openphish, ...)
    pub provider: String,
    /// Whether the provider answered
    pub success: bool,
    /// Normalized risk score (0.0 - 10.0), `None` when no risk signal was found
    pub score: Option<f64>,
    /// Provider-specific findings
    pub data: EnrichmentData,
    /// Failure description
    pub error_message: Option<String>,
    /// Failure category
    pub failure: Option<FailureKind>,
    /// When the result was produced
    pub produced_at: DateTime<Utc>,
}

impl EnrichmentResult {
    /// A successful result. The score is clamped onto the common scale.
    pub fn success(
        enrichment_type: &str,
        provider: &str,
        data: EnrichmentData,
        score: Option<f64>,
    ) -> Self {
        Self {
            adapter_key: adapter_key(enrichment_type, provider),
            enrichment_type: enrichment_type.to_string(),
            provider: provider.to_string(),
            success: true,
            score: score.and_then(clamp_score),
            data,
            error_message: None,
            failure: None,
            produced_at: Utc::now(),
        }
    }

    /// A failed result
    pub fn failure(
        enrichment_type: &str,
        provider: &str,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = kind.to_string();
        }
        Self {
            adapter_key: adapter_key(enrichment_type, provider),
            enrichment_type: enrichment_type.to_string(),
            provider: provider.to_string(),
            success: false,
            score: None,
            data: EnrichmentData::new(),
            error_message: Some(message),
            failure: Some(kind),
            produced_at: Utc::now(),
        }
    }

    /// Whether the orchestrator may try this adapter again
    pub fn is_retryable(&self) -> bool {
        !self.success && self.failure.map_or(true, |kind| kind.is_retryable())
    }

    /// Score usable for aggregation: successful, present and finite
    pub fn contributing_score(&self) -> Option<f64> {
        if self.success {
            self.score.filter(|s| s.is_finite())
        } else {
            None
        }
    }
}

/// All results of one indicator run, keyed by adapter
///
/// Results are kept in adapter registration order so aggregation is
/// reproducible; completion order is not significant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    results: Vec<EnrichmentResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, replacing any earlier result for the same adapter
    pub fn insert(&mut self, result: EnrichmentResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.adapter_key == result.adapter_key)
        {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    pub fn get(&self, adapter_key: &str) -> Option<&EnrichmentResult> {
        self.results.iter().find(|r| r.adapter_key == adapter_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrichmentResult> {
        self.results.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.results.iter().map(|r| r.adapter_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Summary statistics over the results
    pub fn summary(&self) -> EnrichmentSummary {
        EnrichmentSummary::from_results(&self.results)
    }
}

impl FromIterator<EnrichmentResult> for ResultSet {
    fn from_iter<I: IntoIterator<Item = EnrichmentResult>>(iter: I) -> Self {
        let mut set = ResultSet::new();
        for result in iter {
            set.insert(result);
        }
        set
    }
}

impl IntoIterator for ResultSet {
    type Item = EnrichmentResult;
    type IntoIter = std::vec::IntoIter<EnrichmentResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Enrichment statistics for one indicator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Mean of contributing scores (0.0 when none)
    pub average_score: f64,
    /// Maximum contributing score (0.0 when none)
    pub max_score: f64,
    /// Distinct enrichment types, sorted
    pub enrichment_types: Vec<String>,
}

impl EnrichmentSummary {
    pub fn from_results(results: &[EnrichmentResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let scores: Vec<f64> = results.iter().filter_map(|r| r.contributing_score()).collect();

        let (average_score, max_score) = if scores.is_empty() {
            (0.0, 0.0)
        } else {
            let sum: f64 = scores.iter().sum();
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            (sum / scores.len() as f64, max)
        };

        let enrichment_types: BTreeSet<&str> =
            results.iter().map(|r| r.enrichment_type.as_str()).collect();

        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            average_score,
            max_score,
            enrichment_types: enrichment_types.into_iter().map(String::from).collect(),
        }
    }
}
