//! Persistence port for enrichment results

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use lens_core::{EnrichmentResult, ResultSet};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Where completed enrichment results are recorded
#[async_trait]
pub trait EnrichmentRepository: Send + Sync {
    /// Record one result for an indicator
    async fn save(&self, indicator_id: Uuid, result: &EnrichmentResult)
        -> Result<(), RepositoryError>;

    /// Every result recorded for an indicator, latest per adapter
    async fn results_for(&self, indicator_id: Uuid) -> Result<ResultSet, RepositoryError>;
}

pub type SharedRepository = Arc<dyn EnrichmentRepository>;

/// Process-local repository
#[derive(Default)]
pub struct InMemoryRepository {
    results: DashMap<Uuid, ResultSet>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of indicators with at least one stored result
    pub fn indicator_count(&self) -> usize {
        self.results.len()
    }
}

#[async_trait]
impl EnrichmentRepository for InMemoryRepository {
    async fn save(
        &self,
        indicator_id: Uuid,
        result: &EnrichmentResult,
    ) -> Result<(), RepositoryError> {
        self.results
            .entry(indicator_id)
            .or_default()
            .insert(result.clone());
        Ok(())
    }

    async fn results_for(&self, indicator_id: Uuid) -> Result<ResultSet, RepositoryError> {
        Ok(self
            .results
            .get(&indicator_id)
            .map(|set| set.clone())
            .unwrap_or_default())
    }
}
