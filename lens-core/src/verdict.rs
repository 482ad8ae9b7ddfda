//! Risk verdicts - reconciling many provider scores into one signal
//!
//! The strongest successful signal anchors the verdict:
//! - A weak or benign source never dilutes a strong positive from another
//! - Results without a score contribute nothing
//! - The mean is reported alongside as telemetry only

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{
    EnrichmentResult, DEFAULT_HIGH_RISK_THRESHOLD, DEFAULT_MEDIUM_RISK_THRESHOLD, MAX_SCORE,
    MIN_SCORE,
};

/// Aggregated risk level of an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
    Unknown,
}

impl RiskLevel {
    /// Lenient parse accepting forms like "HIGH", "medium risk" or "low_risk"
    pub fn parse_lenient(raw: &str) -> RiskLevel {
        let normalized = raw.trim().to_lowercase();
        let normalized = normalized.trim_end_matches(" risk").trim_end_matches("_risk");
        match normalized {
            "high" | "critical" => RiskLevel::High,
            "medium" => RiskLevel::Medium,
            "low" => RiskLevel::Low,
            _ => RiskLevel::Unknown,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Invalid threshold configuration
#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("Threshold {name} = {value} is outside the 0-10 scale")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("Medium threshold ({medium}) is above high threshold ({high})")]
    Inverted { medium: f64, high: f64 },
}

/// Score boundaries between risk levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high_risk_threshold: f64,
    pub medium_risk_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
            medium_risk_threshold: DEFAULT_MEDIUM_RISK_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Validated thresholds
    pub fn new(high: f64, medium: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            high_risk_threshold: high,
            medium_risk_threshold: medium,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, value) in [
            ("high_risk_threshold", self.high_risk_threshold),
            ("medium_risk_threshold", self.medium_risk_threshold),
        ] {
            if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
                return Err(ThresholdError::OutOfRange { name, value });
            }
        }
        if self.medium_risk_threshold > self.high_risk_threshold {
            return Err(ThresholdError::Inverted {
                medium: self.medium_risk_threshold,
                high: self.high_risk_threshold,
            });
        }
        Ok(())
    }

    /// Map a score on the common scale to a level
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.high_risk_threshold {
            RiskLevel::High
        } else if score >= self.medium_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Aggregated risk signal for one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    /// Anchor score clamped to 0-10
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Non-null scores of successful results, in registration order
    pub contributing_scores: Vec<f64>,
    /// Maximum contributing score
    pub anchor_score: f64,
    /// Mean contributing score, never used for the level decision
    pub average_score: f64,
}

impl RiskVerdict {
    /// Verdict when no source produced a usable score
    pub fn unknown() -> Self {
        Self {
            risk_score: 0.0,
            risk_level: RiskLevel::Unknown,
            contributing_scores: Vec::new(),
            anchor_score: 0.0,
            average_score: 0.0,
        }
    }

    pub fn has_evidence(&self) -> bool {
        !self.contributing_scores.is_empty()
    }
}

/// Reduces a set of enrichment results to a [`RiskVerdict`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAggregator {
    thresholds: Thresholds,
}

impl ScoreAggregator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Aggregate results, which must be given in registration order
    pub fn aggregate<'a, I>(&self, results: I) -> RiskVerdict
    where
        I: IntoIterator<Item = &'a EnrichmentResult>,
    {
        let contributing_scores: Vec<f64> = results
            .into_iter()
            .filter_map(EnrichmentResult::contributing_score)
            .collect();

        if contributing_scores.is_empty() {
            return RiskVerdict::unknown();
        }

        let anchor_score = contributing_scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let average_score =
            contributing_scores.iter().sum::<f64>() / contributing_scores.len() as f64;
        let risk_score = anchor_score.clamp(MIN_SCORE, MAX_SCORE);

        RiskVerdict {
            risk_score,
            risk_level: self.thresholds.level_for(risk_score),
            contributing_scores,
            anchor_score,
            average_score,
        }
    }
}
