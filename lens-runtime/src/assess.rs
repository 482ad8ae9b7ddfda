//! Full assessment of an indicator: enrich, aggregate, optionally judge

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use lens_adapters::{Judgment, Reasoner};
use lens_core::{EnrichmentSummary, Indicator, ResultSet, RiskVerdict, ScoreAggregator};

use crate::orchestrator::Orchestrator;

/// Everything known about one indicator after a run
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub indicator: Indicator,
    pub verdict: RiskVerdict,
    pub summary: EnrichmentSummary,
    pub results: ResultSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_error: Option<String>,
}

pub struct Assessor {
    orchestrator: Orchestrator,
    aggregator: ScoreAggregator,
    reasoner: Option<Arc<dyn Reasoner>>,
}

impl Assessor {
    pub fn new(orchestrator: Orchestrator, aggregator: ScoreAggregator) -> Self {
        Self {
            orchestrator,
            aggregator,
            reasoner: None,
        }
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn conclude(&self, indicator: Indicator, results: ResultSet) -> Assessment {
        let verdict = self.aggregator.aggregate(results.iter());
        let summary = results.summary();
        info!(
            indicator = %indicator,
            level = %verdict.risk_level,
            score = verdict.risk_score,
            results = summary.total,
            failed = summary.failed,
            "Assessment complete"
        );
        Assessment {
            indicator,
            verdict,
            summary,
            results,
            judgment: None,
            reasoning_error: None,
        }
    }

    /// Enrich and aggregate one indicator, then consult the reasoner if one is set.
    /// A reasoning failure is reported alongside the verdict, never instead of it.
    pub async fn assess(&self, indicator: &Indicator) -> Assessment {
        let results = self.orchestrator.enrich_indicator(indicator).await;
        let mut assessment = self.conclude(indicator.clone(), results);

        if let Some(reasoner) = &self.reasoner {
            match reasoner
                .judge(&assessment.indicator, &assessment.results, &assessment.verdict)
                .await
            {
                Ok(judgment) => assessment.judgment = Some(judgment),
                Err(e) => {
                    warn!(indicator = %indicator, error = %e, "Reasoning failed");
                    assessment.reasoning_error = Some(e.to_string());
                }
            }
        }

        assessment
    }

    /// Enrich and aggregate many indicators; input order is preserved.
    /// The reasoner is not consulted for batches.
    pub async fn assess_batch(&self, indicators: &[Indicator]) -> Vec<Assessment> {
        let mut batch = self.orchestrator.enrich_batch(indicators).await;
        indicators
            .iter()
            .map(|indicator| {
                let results = batch.remove(&indicator.id).unwrap_or_default();
                self.conclude(indicator.clone(), results)
            })
            .collect()
    }
}
