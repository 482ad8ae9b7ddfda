//! Threat indicators submitted for enrichment
//!
//! Supports detection and normalization of:
//! - Domains and URLs
//! - IPv4 and IPv6 addresses
//! - MD5, SHA1 and SHA256 file hashes
//! - Email addresses

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

/// Kinds of indicators the enrichment engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Domain,
    Ip,
    Hash,
    Url,
    Email,
}

impl IndicatorType {
    /// Every indicator type, in declaration order
    pub const ALL: [IndicatorType; 5] = [
        IndicatorType::Domain,
        IndicatorType::Ip,
        IndicatorType::Hash,
        IndicatorType::Url,
        IndicatorType::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Domain => "domain",
            IndicatorType::Ip => "ip",
            IndicatorType::Hash => "hash",
            IndicatorType::Url => "url",
            IndicatorType::Email => "email",
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorType {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "domain" => Ok(IndicatorType::Domain),
            "ip" => Ok(IndicatorType::Ip),
            "hash" => Ok(IndicatorType::Hash),
            "url" => Ok(IndicatorType::Url),
            "email" => Ok(IndicatorType::Email),
            other => Err(IndicatorError::UnknownType(other.to_string())),
        }
    }
}

/// Errors raised while building indicators
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("Indicator value is empty")]
    Empty,

    #[error("Could not determine indicator type for: {0}")]
    Unrecognized(String),

    #[error("Unknown indicator type: {0}")]
    UnknownType(String),
}

/// A threat indicator being assessed
///
/// Immutable for the duration of an enrichment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    /// Caller-assigned identity
    pub id: Uuid,
    /// Indicator type
    pub indicator_type: IndicatorType,
    /// Normalized value
    pub value: String,
}

impl Indicator {
    /// Create an indicator with a fresh identity
    pub fn new(indicator_type: IndicatorType, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            indicator_type,
            value: value.into(),
        }
    }

    /// Detect the type of a raw value and normalize it
    pub fn parse(raw: &str) -> Result<Self, IndicatorError> {
        let indicator_type = detect_indicator_type(raw)?;
        Ok(Self::new(indicator_type, normalize_indicator(raw, indicator_type)))
    }

    /// Build an indicator of a known type, normalizing the value
    pub fn typed(indicator_type: IndicatorType, raw: &str) -> Result<Self, IndicatorError> {
        if raw.trim().is_empty() {
            return Err(IndicatorError::Empty);
        }
        Ok(Self::new(indicator_type, normalize_indicator(raw, indicator_type)))
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.indicator_type, self.value)
    }
}

static HASH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-f0-9]{32}|[a-f0-9]{40}|[a-f0-9]{64})$").unwrap()
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").unwrap()
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?|ftp)://[^\s/$.?#][^\s]*$").unwrap()
});

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

/// Detect the type of an indicator from its value
///
/// Checked in order: hash, IP, email, URL, domain.
pub fn detect_indicator_type(raw: &str) -> Result<IndicatorType, IndicatorError> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return Err(IndicatorError::Empty);
    }

    if HASH_REGEX.is_match(&value) {
        return Ok(IndicatorType::Hash);
    }
    if value.parse::<IpAddr>().is_ok() {
        return Ok(IndicatorType::Ip);
    }
    if EMAIL_REGEX.is_match(&value) {
        return Ok(IndicatorType::Email);
    }
    if URL_REGEX.is_match(&value) {
        return Ok(IndicatorType::Url);
    }
    if DOMAIN_REGEX.is_match(value.trim_end_matches('.')) {
        return Ok(IndicatorType::Domain);
    }

    Err(IndicatorError::Unrecognized(raw.trim().to_string()))
}

/// Normalize an indicator value for its type
pub fn normalize_indicator(raw: &str, indicator_type: IndicatorType) -> String {
    let value = raw.trim();
    match indicator_type {
        IndicatorType::Domain => {
            let host = match value.split_once("://") {
                Some((_, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(rest),
                None => value,
            };
            host.to_lowercase().trim_end_matches('.').to_string()
        }
        IndicatorType::Hash
        | IndicatorType::Ip
        | IndicatorType::Url
        | IndicatorType::Email => value.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_hashes() {
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        let sha256 = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        assert_eq!(detect_indicator_type(md5), Ok(IndicatorType::Hash));
        assert_eq!(detect_indicator_type(sha256), Ok(IndicatorType::Hash));
    }

    #[test]
    fn test_detect_ip() {
        assert_eq!(detect_indicator_type("185.220.101.4"), Ok(IndicatorType::Ip));
        assert_eq!(detect_indicator_type("2001:db8::1"), Ok(IndicatorType::Ip));
    }

    #[test]
    fn test_detect_email_url_domain() {
        assert_eq!(detect_indicator_type("admin@evil.example"), Ok(IndicatorType::Email));
        assert_eq!(
            detect_indicator_type("http://login.evil.example/verify?id=1"),
            Ok(IndicatorType::Url)
        );
        assert_eq!(detect_indicator_type("Evil.Example."), Ok(IndicatorType::Domain));
    }

    #[test]
    fn test_detect_rejects_garbage() {
        assert_eq!(detect_indicator_type("   "), Err(IndicatorError::Empty));
        assert!(matches!(
            detect_indicator_type("not an indicator"),
            Err(IndicatorError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_indicator("https://Evil.Example./path", IndicatorType::Domain),
            "evil.example"
        );
        assert_eq!(normalize_indicator(" EVIL.example ", IndicatorType::Domain), "evil.example");
    }

    #[test]
    fn test_parse_indicator() {
        let indicator = Indicator::parse("  HTTP://Phish.Example/Login ").unwrap();
        assert_eq!(indicator.indicator_type, IndicatorType::Url);
        assert_eq!(indicator.value, "http://phish.example/login");
    }

    #[test]
    fn test_indicator_type_from_str() {
        assert_eq!("IP".parse::<IndicatorType>(), Ok(IndicatorType::Ip));
        assert!("onion".parse::<IndicatorType>().is_err());
    }
}
