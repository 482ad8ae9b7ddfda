//! Wiring from [`Settings`] to a ready-to-use registry, reasoner and assessor
//!
//! Keyed providers are registered only when a key is configured. PhishTank
//! is registered only when its feed preloads; OpenPhish is always registered
//! and its preload only warms the cache.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use lens_adapters::{
    create_backend, AbuseIpDbAdapter, LlmConfig, LlmError, LlmReasoner, MalShareAdapter,
    OpenPhishAdapter, PhishTankAdapter, Reasoner, OPENPHISH_DEFAULT_TTL, OPENPHISH_FEED_URL,
    PHISHTANK_DEFAULT_TTL, PHISHTANK_FEED_URL,
};
use lens_core::{ScoreAggregator, ThresholdError};
use lens_feeds::{FetchError, HttpFeedSource, SharedFeedSource};

use crate::assess::Assessor;
use crate::config::Settings;
use crate::orchestrator::{ExecutionPolicy, Orchestrator};
use crate::registry::AdapterRegistry;
use crate::repository::SharedRepository;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("HTTP client: {0}")]
    Http(#[from] FetchError),

    #[error("Reasoning backend: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Thresholds(#[from] ThresholdError),

    #[error("Reasoning requested but no API key is configured for {0}")]
    MissingReasoningKey(String),
}

/// Build the adapter registry, downloading feeds through the given source
pub async fn build_registry(
    settings: &Settings,
    source: SharedFeedSource,
) -> Result<AdapterRegistry, BootstrapError> {
    let http = settings.http_config();
    let mut registry = AdapterRegistry::new();

    let abuseipdb = settings.provider("abuseipdb");
    if abuseipdb.enabled {
        match abuseipdb.api_key {
            Some(key) => registry.register(Arc::new(AbuseIpDbAdapter::new(Some(key), &http)?)),
            None => warn!("AbuseIPDB API key not configured, skipping adapter"),
        }
    }

    let openphish = settings.provider("openphish");
    if openphish.enabled {
        let adapter = OpenPhishAdapter::new(
            Arc::clone(&source),
            openphish.feed_url.as_deref().unwrap_or(OPENPHISH_FEED_URL),
            openphish.cache_ttl().unwrap_or(OPENPHISH_DEFAULT_TTL),
        );
        match adapter.preload().await {
            Ok(entries) => info!(entries, "OpenPhish feed loaded"),
            Err(e) => warn!(error = %e, "OpenPhish feed preload failed, will retry on demand"),
        }
        registry.register(Arc::new(adapter));
    }

    let malshare = settings.provider("malshare");
    if malshare.enabled {
        match malshare.api_key {
            Some(key) => registry.register(Arc::new(MalShareAdapter::new(Some(key), &http)?)),
            None => warn!("MalShare API key not configured, skipping adapter"),
        }
    }

    let phishtank = settings.provider("phishtank");
    if phishtank.enabled {
        let adapter = PhishTankAdapter::new(
            source,
            phishtank.feed_url.as_deref().unwrap_or(PHISHTANK_FEED_URL),
            phishtank.cache_ttl().unwrap_or(PHISHTANK_DEFAULT_TTL),
        );
        match adapter.preload().await {
            Ok(entries) => {
                info!(entries, "PhishTank feed loaded");
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!(error = %e, "PhishTank feed failed to preload, skipping adapter"),
        }
    }

    if registry.is_empty() {
        warn!("No adapters registered; configure API keys or enable feeds");
    } else {
        info!(adapters = registry.len(), "Adapter registry ready");
    }
    Ok(registry)
}

/// Build the LLM reasoner described by `[reasoning]`
pub fn build_reasoner(settings: &Settings) -> Result<Arc<dyn Reasoner>, BootstrapError> {
    let reasoning = &settings.reasoning;
    let api_key = reasoning
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| BootstrapError::MissingReasoningKey(reasoning.provider.to_string()))?;

    let config = LlmConfig {
        provider: reasoning.provider,
        api_key,
        model: reasoning.model.clone(),
        base_url: None,
        temperature: reasoning.temperature,
        max_tokens: reasoning.max_tokens,
    }
    .with_base_url(reasoning.base_url.clone());

    let backend = create_backend(config, &settings.http_config())?;
    info!(provider = %reasoning.provider, model = %reasoning.model, "Reasoner ready");

    Ok(Arc::new(
        LlmReasoner::new(backend, settings.thresholds()?)
            .with_timeout(Duration::from_secs(reasoning.timeout_secs)),
    ))
}

/// Assessor over live HTTP feeds and the given repository
pub async fn build_assessor(
    settings: &Settings,
    repository: SharedRepository,
    with_reasoning: bool,
) -> Result<Assessor, BootstrapError> {
    let source = HttpFeedSource::shared(&settings.http_config())?;
    let registry = build_registry(settings, source).await?;
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        repository,
        ExecutionPolicy::from(&settings.enrichment),
    );

    let assessor = Assessor::new(orchestrator, ScoreAggregator::new(settings.thresholds()?));
    if with_reasoning {
        return Ok(assessor.with_reasoner(build_reasoner(settings)?));
    }
    Ok(assessor)
}
