//! ThreatLens Adapters
//!
//! Provider adapters that turn one indicator into one enrichment result:
//! - **AbuseIPDB**: IP reputation (API key)
//! - **OpenPhish**: community phishing feed (bulk, cached)
//! - **PhishTank**: verified phishing submissions (bulk, cached)
//! - **MalShare**: malware hash lookups (API key)
//!
//! Also hosts the LLM backends and the reasoning step that judges an
//! indicator from its aggregated evidence.

use std::time::Duration;

pub mod abuseipdb;
pub mod backend;
pub mod malshare;
pub mod openphish;
pub mod phishtank;
pub mod reasoning;
pub mod traits;

pub use abuseipdb::*;
pub use backend::*;
pub use malshare::*;
pub use openphish::*;
pub use phishtank::*;
pub use reasoning::*;
pub use traits::*;

/// Score given to an indicator found on a curated blocklist
pub const LISTED_SCORE: f64 = 9.0;

/// Shortest refresh interval accepted for bulk feeds
pub const MIN_FEED_TTL: Duration = Duration::from_secs(60);
