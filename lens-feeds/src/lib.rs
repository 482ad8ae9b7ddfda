//! ThreatLens Feeds
//!
//! Network plumbing shared by provider adapters:
//! - HTTP client construction with optional proxying
//! - Feed sources (bulk dataset downloads)
//! - Feed parsers for URL lists and PhishTank dumps
//! - A single-flight, time-bounded feed cache

pub mod cache;
pub mod client;
pub mod parse;
pub mod source;

pub use cache::*;
pub use client::*;
pub use parse::*;
pub use source::*;
