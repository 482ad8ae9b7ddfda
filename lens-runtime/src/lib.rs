//! ThreatLens Runtime
//!
//! Turns settings into a running enrichment pipeline:
//! - [`Settings`] loaded once from TOML
//! - [`AdapterRegistry`] built at startup and shared read-only
//! - [`Orchestrator`] fanning indicators out to adapters under one
//!   concurrency ceiling, with per-attempt deadlines and retries
//! - [`Assessor`] combining enrichment, aggregation and optional reasoning

pub mod assess;
pub mod bootstrap;
pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod repository;

pub use assess::*;
pub use bootstrap::*;
pub use config::*;
pub use orchestrator::*;
pub use registry::*;
pub use repository::*;
