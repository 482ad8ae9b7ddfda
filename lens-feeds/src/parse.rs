//! Feed parsers
//!
//! Turns raw feed bodies into lookup-friendly datasets:
//! - Plain text URL lists (OpenPhish community feed)
//! - PhishTank JSON dumps, indexed by several URL normalizations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors from feed parsing
#[derive(Debug, Error, PartialEq)]
pub enum FeedParseError {
    #[error("Feed returned no entries")]
    Empty,

    #[error("Invalid feed format: {0}")]
    Format(String),
}

/// A set of known-bad URLs
#[derive(Debug, Clone, Default)]
pub struct UrlFeed {
    urls: HashSet<String>,
}

impl UrlFeed {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Exact match, ignoring case and a trailing slash
    pub fn contains_url(&self, url: &str) -> bool {
        let normalized = url.trim().to_lowercase();
        let bare = normalized.trim_end_matches('/');
        self.urls.contains(&normalized)
            || self.urls.contains(bare)
            || self.urls.contains(&format!("{}/", bare))
    }

    /// Whether any listed URL mentions the domain
    pub fn mentions_domain(&self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        !domain.is_empty() && self.urls.iter().any(|url| url.contains(&domain))
    }
}

/// Parse a newline separated URL list, skipping blanks and `#` comments
pub fn parse_url_feed(body: &str) -> Result<UrlFeed, FeedParseError> {
    let urls: HashSet<String> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_lowercase)
        .collect();

    if urls.is_empty() {
        return Err(FeedParseError::Empty);
    }
    Ok(UrlFeed { urls })
}

/// One verified or pending phishing submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhishEntry {
    pub phish_id: Option<String>,
    pub url: String,
    pub target: Option<String>,
    pub verified: bool,
    pub submitted_at: Option<String>,
}

impl PhishEntry {
    /// Link to the submission's detail page
    pub fn detail_page(&self) -> Option<String> {
        self.phish_id
            .as_ref()
            .map(|id| format!("https://phishtank.org/phish_detail.php?phish_id={}", id))
    }
}

#[derive(Debug, Deserialize)]
struct RawPhishEntry {
    #[serde(default)]
    phish_id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    phish_url: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    verified: Option<Value>,
    #[serde(default)]
    submission_time: Option<String>,
}

/// PhishTank dump indexed by normalized URL
#[derive(Debug, Clone, Default)]
pub struct PhishTankFeed {
    entries: Vec<PhishEntry>,
    index: HashMap<String, usize>,
}

impl PhishTankFeed {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a URL: exact, lowercase, then without query string
    pub fn lookup(&self, url: &str) -> Option<&PhishEntry> {
        url_variants(url)
            .iter()
            .find_map(|variant| self.index.get(variant))
            .map(|&idx| &self.entries[idx])
    }
}

/// Lookup keys for a URL, most specific first
pub fn url_variants(url: &str) -> Vec<String> {
    let exact = url.trim().to_string();
    let lower = exact.to_lowercase();
    let stripped = lower
        .split(['?', '#'])
        .next()
        .unwrap_or(&lower)
        .to_string();
    let stripped_exact = exact
        .split(['?', '#'])
        .next()
        .unwrap_or(&exact)
        .to_string();

    let mut variants = Vec::with_capacity(4);
    for candidate in [exact, lower, stripped_exact, stripped] {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a PhishTank JSON dump (top-level array of submissions)
pub fn parse_phishtank_feed(body: &str) -> Result<PhishTankFeed, FeedParseError> {
    let raw: Vec<RawPhishEntry> =
        serde_json::from_str(body).map_err(|e| FeedParseError::Format(e.to_string()))?;

    let mut feed = PhishTankFeed::default();

    for item in raw {
        let Some(url) = item.url.or(item.phish_url).map(|u| u.trim().to_string()) else {
            continue;
        };
        if url.is_empty() {
            continue;
        }

        let verified = item
            .verified
            .as_ref()
            .and_then(value_as_string)
            .map(|v| matches!(v.to_lowercase().as_str(), "yes" | "true" | "1"))
            .unwrap_or(false);

        let idx = feed.entries.len();
        for variant in url_variants(&url) {
            feed.index.entry(variant).or_insert(idx);
        }
        feed.entries.push(PhishEntry {
            phish_id: item.phish_id.as_ref().and_then(value_as_string),
            url,
            target: item.target,
            verified,
            submitted_at: item.submission_time,
        });
    }

    if feed.entries.is_empty() {
        return Err(FeedParseError::Empty);
    }
    Ok(feed)
}
