//! Reasoning - an LLM judgment over enrichment evidence
//!
//! Runs after aggregation and never changes the enrichment results:
//! - Observations are derived from each result's data
//! - The backend answers with a JSON judgment
//! - When there is scored evidence the delivered level and score are
//!   reconciled to the aggregated verdict

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use lens_core::{
    EnrichmentData, EnrichmentResult, Indicator, ResultSet, RiskLevel, RiskVerdict, Thresholds,
};

use crate::{LlmError, SharedBackend};

const REASONER_SYSTEM_PROMPT: &str = r#"
You are a threat intelligence analyst classifying indicators of compromise.

Risk levels:
- high (7.0-10.0): confirmed malicious activity or malware
- medium (4.0-6.9): suspicious, needs monitoring
- low (0.0-3.9): likely benign

Treat the highest enrichment score as the baseline; do not let weak sources
dilute a strong signal.

Answer with a single JSON object and nothing else:
{"risk_level": "high|medium|low", "risk_score": 0.0, "confidence": 0.0,
 "reasoning": "...", "key_factors": ["..."]}
"#;

/// Errors from the reasoning step
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Backend(#[from] LlmError),

    #[error("Could not parse judgment: {0}")]
    Parse(String),

    #[error("Reasoning timed out after {0} seconds")]
    Timeout(u64),
}

/// Final classification of an indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub model: String,
    pub judged_at: DateTime<Utc>,
}

/// Something that can judge an indicator from its enrichment results
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn judge(
        &self,
        indicator: &Indicator,
        results: &ResultSet,
        verdict: &RiskVerdict,
    ) -> Result<Judgment, ReasoningError>;
}

fn num(data: &EnrichmentData, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn flag(data: &EnrichmentData, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn text<'a>(data: &'a EnrichmentData, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn score_label(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{:.1}/10", s),
        None => "none".to_string(),
    }
}

fn observe_ip_reputation(result: &EnrichmentResult, out: &mut Vec<String>) {
    let data = &result.data;
    let confidence = num(data, "abuse_confidence_score");
    out.push(match confidence {
        c if c >= 80.0 => format!("High abuse confidence ({}%) - CRITICAL", c),
        c if c >= 50.0 => format!("Moderate abuse confidence ({}%) - HIGH RISK", c),
        c if c >= 20.0 => format!("Some abuse reports ({}%)", c),
        c => format!("Low abuse confidence ({}%)", c),
    });

    let reports = num(data, "total_reports");
    if reports > 100.0 {
        out.push(format!("Extensively reported ({} reports)", reports));
    } else if reports > 10.0 {
        out.push(format!("Multiple abuse reports ({})", reports));
    }
    if flag(data, "is_tor") {
        out.push("Tor exit node detected - anonymization risk".to_string());
    }
    if let (Some(isp), Some(usage)) = (text(data, "isp"), text(data, "usage_type")) {
        out.push(format!("Hosted on {} ({})", isp, usage));
    }
    out.push(format!("IP reputation score: {}", score_label(result.score)));
}

fn observe_hash_lookup(result: &EnrichmentResult, out: &mut Vec<String>) {
    let data = &result.data;
    if flag(data, "is_malware") {
        out.push(format!("CONFIRMED MALWARE in {}", result.provider));
    } else {
        out.push(format!("Hash not known to {}", result.provider));
    }
    if let Some(file_type) = text(data, "file_type") {
        out.push(format!("File type: {}", file_type));
    }
    out.push(format!("Hash lookup score: {}", score_label(result.score)));
}

fn observe_phishing(result: &EnrichmentResult, out: &mut Vec<String>) {
    let data = &result.data;
    if flag(data, "listed") || flag(data, "found") {
        let mut line = format!("Listed in {} phishing feed", result.provider);
        if let Some(target) = text(data, "target") {
            line.push_str(&format!(" (target: {})", target));
        }
        if data.get("verified").and_then(Value::as_bool) == Some(true) {
            line.push_str(" - verified");
        }
        out.push(line);
    } else {
        out.push(format!("Not listed in {} phishing feed", result.provider));
    }
}

/// Human readable observations derived from enrichment results
pub fn observations(results: &ResultSet) -> Vec<String> {
    let mut out = Vec::new();
    for result in results.iter() {
        if !result.success {
            out.push(format!(
                "{}: enrichment failed - {}",
                result.adapter_key,
                result.error_message.as_deref().unwrap_or("unknown error")
            ));
            continue;
        }
        match result.enrichment_type.as_str() {
            "ip_reputation" => observe_ip_reputation(result, &mut out),
            "hash_lookup" => observe_hash_lookup(result, &mut out),
            "phishing_check" => observe_phishing(result, &mut out),
            other => out.push(format!("{}: score={}", other, score_label(result.score))),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    risk_level: String,
    #[serde(default)]
    risk_score: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    key_factors: Vec<String>,
}

/// Pull the JSON object out of a model response, tolerating code fences
fn parse_raw_judgment(response: &str) -> Result<RawJudgment, ReasoningError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => return Err(ReasoningError::Parse("no JSON object in response".to_string())),
    };
    serde_json::from_str(json).map_err(|e| ReasoningError::Parse(e.to_string()))
}

/// Reasoner backed by an LLM
pub struct LlmReasoner {
    backend: SharedBackend,
    thresholds: Thresholds,
    timeout: Duration,
}

impl LlmReasoner {
    pub fn new(backend: SharedBackend, thresholds: Thresholds) -> Self {
        Self {
            backend,
            thresholds,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_prompt(indicator: &Indicator, results: &ResultSet, verdict: &RiskVerdict) -> String {
        let observed = observations(results);
        let observed = if observed.is_empty() {
            "- No observations available".to_string()
        } else {
            observed
                .iter()
                .map(|o| format!("- {}", o))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "Indicator Type: {}\nIndicator Value: {}\n\nAverage Enrichment Score: {:.2}/10.0\nMaximum Enrichment Score: {:.2}/10.0\n\nKey Observations:\n{}\n",
            indicator.indicator_type,
            indicator.value,
            verdict.average_score,
            verdict.anchor_score,
            observed
        )
    }

    /// Align a raw judgment with the aggregated verdict
    fn reconcile(&self, raw: RawJudgment, verdict: &RiskVerdict) -> Judgment {
        let (risk_level, risk_score) = if verdict.has_evidence() {
            (self.thresholds.level_for(verdict.risk_score), verdict.risk_score)
        } else {
            let score = raw.risk_score.clamp(0.0, 10.0);
            (RiskLevel::parse_lenient(&raw.risk_level), score)
        };

        Judgment {
            risk_level,
            risk_score,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasoning: raw.reasoning,
            key_factors: raw.key_factors,
            model: self.backend.model_name().to_string(),
            judged_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn judge(
        &self,
        indicator: &Indicator,
        results: &ResultSet,
        verdict: &RiskVerdict,
    ) -> Result<Judgment, ReasoningError> {
        let prompt = Self::build_prompt(indicator, results, verdict);

        let response = tokio::time::timeout(
            self.timeout,
            self.backend.generate(REASONER_SYSTEM_PROMPT, &prompt),
        )
        .await
        .map_err(|_| ReasoningError::Timeout(self.timeout.as_secs()))??;

        let raw = match parse_raw_judgment(&response) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(indicator = %indicator, error = %e, "Unparseable judgment");
                return Err(e);
            }
        };
        let judgment = self.reconcile(raw, verdict);

        info!(
            indicator = %indicator,
            level = %judgment.risk_level,
            score = judgment.risk_score,
            confidence = judgment.confidence,
            "Classification complete"
        );
        Ok(judgment)
    }
}
