//! ThreatLens Core - Indicator model and risk scoring
//!
//! This crate provides the foundational primitives:
//! - Threat indicators and indicator type detection
//! - Enrichment results produced by provider adapters
//! - The failure taxonomy shared by every adapter
//! - Score aggregation into a single risk verdict

pub mod indicator;
pub mod result;
pub mod verdict;

pub use indicator::*;
pub use result::*;
pub use verdict::*;

/// Lowest score on the common risk scale
pub const MIN_SCORE: f64 = 0.0;

/// Highest score on the common risk scale
pub const MAX_SCORE: f64 = 10.0;

/// Default score at or above which an indicator is high risk
pub const DEFAULT_HIGH_RISK_THRESHOLD: f64 = 7.0;

/// Default score at or above which an indicator is medium risk
pub const DEFAULT_MEDIUM_RISK_THRESHOLD: f64 = 4.0;

/// Clamp a raw provider score onto the common 0-10 scale.
///
/// Non-finite values carry no usable signal and map to `None`.
pub fn clamp_score(raw: f64) -> Option<f64> {
    if raw.is_finite() {
        Some(raw.clamp(MIN_SCORE, MAX_SCORE))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(11.3), Some(10.0));
        assert_eq!(clamp_score(-1.0), Some(0.0));
        assert_eq!(clamp_score(4.2), Some(4.2));
        assert_eq!(clamp_score(f64::NAN), None);
    }
}
