//! Enrichment orchestrator
//!
//! Fans an indicator (or a batch) out to every applicable adapter:
//! - One semaphore per orchestrator bounds in-flight adapter calls across
//!   single and batch runs alike
//! - Each attempt runs in its own task under a deadline; an expired attempt
//!   is aborted and reported as a timeout without touching its siblings
//! - Retryable failures are retried up to the configured attempt count
//! - Each result is persisted as soon as its adapter finishes; storage problems
//!   are logged and never fail the run

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lens_adapters::SharedAdapter;
use lens_core::{EnrichmentResult, EnrichmentSummary, FailureKind, Indicator, ResultSet};

use crate::config::EnrichmentSettings;
use crate::registry::AdapterRegistry;
use crate::repository::{RepositoryError, SharedRepository};

/// How adapter calls are admitted, bounded and retried
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Ceiling on concurrently running adapter calls
    pub max_concurrent: usize,
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Total attempts per adapter call, at least one
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl From<&EnrichmentSettings> for ExecutionPolicy {
    fn from(settings: &EnrichmentSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
        }
    }
}

/// Runs adapters for indicators. Cheap to clone; clones share the limiter.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<AdapterRegistry>,
    repository: SharedRepository,
    policy: ExecutionPolicy,
    limiter: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        repository: SharedRepository,
        policy: ExecutionPolicy,
    ) -> Self {
        let permits = policy.max_concurrent.max(1);
        info!(
            max_concurrent = permits,
            timeout_secs = policy.timeout.as_secs_f64(),
            max_retries = policy.max_retries,
            adapters = registry.len(),
            "Orchestrator initialized"
        );
        Self {
            registry,
            repository,
            policy,
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// One attempt in its own task, bounded by the policy deadline
    async fn attempt(&self, indicator: &Indicator, adapter: &SharedAdapter) -> EnrichmentResult {
        let task_adapter = Arc::clone(adapter);
        let value = indicator.value.clone();
        let indicator_type = indicator.indicator_type;

        let mut handle =
            tokio::spawn(async move { task_adapter.enrich(&value, indicator_type).await });

        match tokio::time::timeout(self.policy.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(adapter = %adapter.key(), indicator = %indicator.value, error = %join_error, "Adapter task failed");
                adapter.fail(
                    FailureKind::Internal,
                    &format!("adapter task failed: {}", join_error),
                )
            }
            Err(_) => {
                handle.abort();
                adapter.fail(
                    FailureKind::Timeout,
                    &format!("timed out after {:?}", self.policy.timeout),
                )
            }
        }
    }

    /// Run one adapter for one indicator under the shared limiter
    pub async fn run_adapter(
        &self,
        indicator: &Indicator,
        adapter: &SharedAdapter,
    ) -> EnrichmentResult {
        let key = adapter.key();
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => return adapter.fail(FailureKind::Internal, "concurrency limiter closed"),
        };

        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let result = self.attempt(indicator, adapter).await;

            if result.success {
                debug!(adapter = %key, indicator = %indicator.value, attempt, score = ?result.score, "Enrichment succeeded");
                return result;
            }

            let message = result.error_message.as_deref().unwrap_or_default();
            if !result.is_retryable() || attempt >= attempts {
                warn!(adapter = %key, indicator = %indicator.value, attempt, error = %message, "Enrichment failed");
                return result;
            }

            debug!(adapter = %key, indicator = %indicator.value, attempt, error = %message, "Retrying enrichment");
            tokio::time::sleep(self.policy.retry_delay).await;
            attempt += 1;
        }
    }

    async fn persist(&self, indicator: &Indicator, result: &EnrichmentResult) {
        if let Err(e) = self.repository.save(indicator.id, result).await {
            warn!(adapter = %result.adapter_key, indicator = %indicator, error = %e, "Failed to persist result");
        }
    }

    /// Run every applicable adapter and return all of their results
    pub async fn enrich_indicator(&self, indicator: &Indicator) -> ResultSet {
        let adapters = self.registry.adapters_for(indicator.indicator_type);
        if adapters.is_empty() {
            warn!(indicator = %indicator, "No adapters registered for indicator type");
            return ResultSet::new();
        }

        info!(indicator = %indicator, adapters = adapters.len(), "Enriching indicator");

        // each future persists its own result as soon as it completes
        let mut pending: FuturesUnordered<_> = adapters
            .iter()
            .enumerate()
            .map(|(idx, adapter)| async move {
                let result = self.run_adapter(indicator, adapter).await;
                self.persist(indicator, &result).await;
                (idx, result)
            })
            .collect();

        let mut slots: Vec<Option<EnrichmentResult>> = vec![None; adapters.len()];
        while let Some((idx, result)) = pending.next().await {
            slots[idx] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }

    /// Enrich many indicators, one task each, all through the same limiter
    pub async fn enrich_batch(&self, indicators: &[Indicator]) -> HashMap<Uuid, ResultSet> {
        info!(indicators = indicators.len(), "Batch enrichment started");

        let handles: Vec<_> = indicators
            .iter()
            .cloned()
            .map(|indicator| {
                let this = self.clone();
                let id = indicator.id;
                let handle = tokio::spawn(async move { this.enrich_indicator(&indicator).await });
                (id, handle)
            })
            .collect();

        let mut batch = HashMap::with_capacity(handles.len());
        for (id, handle) in handles {
            let results = match handle.await {
                Ok(results) => results,
                Err(e) => {
                    error!(indicator_id = %id, error = %e, "Indicator task failed");
                    ResultSet::new()
                }
            };
            batch.insert(id, results);
        }

        info!(indicators = batch.len(), "Batch enrichment complete");
        batch
    }

    /// Statistics over everything stored for an indicator
    pub async fn summary(&self, indicator_id: Uuid) -> Result<EnrichmentSummary, RepositoryError> {
        Ok(self.repository.results_for(indicator_id).await?.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{EnrichmentRepository, InMemoryRepository};
    use async_trait::async_trait;
    use lens_adapters::ProviderAdapter;
    use lens_core::{EnrichmentData, IndicatorType};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Score(f64),
        Silent,
        Fail(FailureKind),
        FailFirst(u32, FailureKind),
        Hang,
        Panic,
    }

    struct Stub {
        provider: String,
        behavior: Behavior,
        only: Option<IndicatorType>,
        delay: Duration,
        calls: AtomicU32,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Stub {
        fn new(provider: &str, behavior: Behavior) -> Self {
            Self {
                provider: provider.to_string(),
                behavior,
                only: None,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn only(mut self, indicator_type: IndicatorType) -> Self {
            self.only = Some(indicator_type);
            self
        }

        fn tracked(mut self, delay: Duration, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            self.delay = delay;
            self.in_flight = Arc::clone(in_flight);
            self.peak = Arc::clone(peak);
            self
        }
    }

    #[async_trait]
    impl ProviderAdapter for Stub {
        fn enrichment_type(&self) -> &str {
            "test"
        }

        fn provider(&self) -> &str {
            &self.provider
        }

        fn is_applicable(&self, indicator_type: IndicatorType) -> bool {
            indicator_type != IndicatorType::Email
                && self.only.map_or(true, |t| t == indicator_type)
        }

        async fn enrich(&self, _value: &str, _indicator_type: IndicatorType) -> EnrichmentResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut data = EnrichmentData::new();
            match self.behavior {
                Behavior::Score(score) => {
                    data.insert("score".into(), score.into());
                    self.succeed(data)
                }
                Behavior::Silent => self.succeed(data),
                Behavior::Fail(kind) => self.fail(kind, "stub failure"),
                Behavior::FailFirst(n, kind) if call <= n => self.fail(kind, "stub failure"),
                Behavior::FailFirst(..) => {
                    data.insert("score".into(), 5.0.into());
                    self.succeed(data)
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    self.succeed(data)
                }
                Behavior::Panic => panic!("stub adapter exploded"),
            }
        }

        fn score_of(&self, data: &EnrichmentData) -> Option<f64> {
            data.get("score").and_then(|v| v.as_f64())
        }
    }

    struct FailingRepository;

    #[async_trait]
    impl EnrichmentRepository for FailingRepository {
        async fn save(&self, _id: Uuid, _result: &EnrichmentResult) -> Result<(), RepositoryError> {
            Err(RepositoryError::Unavailable("disk full".into()))
        }

        async fn results_for(&self, _id: Uuid) -> Result<ResultSet, RepositoryError> {
            Err(RepositoryError::Unavailable("disk full".into()))
        }
    }

    /// Takes a long time to store anything
    struct SlowRepository {
        delay: Duration,
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl EnrichmentRepository for SlowRepository {
        async fn save(&self, id: Uuid, result: &EnrichmentResult) -> Result<(), RepositoryError> {
            tokio::time::sleep(self.delay).await;
            self.inner.save(id, result).await
        }

        async fn results_for(&self, id: Uuid) -> Result<ResultSet, RepositoryError> {
            self.inner.results_for(id).await
        }
    }

    /// Panics while persisting results of one specific indicator
    struct PoisonedRepository {
        poisoned: Uuid,
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl EnrichmentRepository for PoisonedRepository {
        async fn save(&self, id: Uuid, result: &EnrichmentResult) -> Result<(), RepositoryError> {
            if id == self.poisoned {
                panic!("storage driver crashed");
            }
            self.inner.save(id, result).await
        }

        async fn results_for(&self, id: Uuid) -> Result<ResultSet, RepositoryError> {
            self.inner.results_for(id).await
        }
    }

    fn policy(max_concurrent: usize, max_retries: u32) -> ExecutionPolicy {
        ExecutionPolicy {
            max_concurrent,
            timeout: Duration::from_secs(1),
            max_retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn orchestrator(
        adapters: Vec<Arc<Stub>>,
        repository: SharedRepository,
        policy: ExecutionPolicy,
    ) -> Orchestrator {
        let mut registry = AdapterRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        Orchestrator::new(Arc::new(registry), repository, policy)
    }

    fn domain(value: &str) -> Indicator {
        Indicator::new(IndicatorType::Domain, value)
    }

    #[tokio::test]
    async fn test_one_result_per_adapter_in_registration_order() {
        let repo = InMemoryRepository::shared();
        let orch = orchestrator(
            vec![
                Arc::new(Stub::new("slow", Behavior::Score(2.0)).tracked(
                    Duration::from_millis(30),
                    &Arc::new(AtomicUsize::new(0)),
                    &Arc::new(AtomicUsize::new(0)),
                )),
                Arc::new(Stub::new("high", Behavior::Score(9.5))),
                Arc::new(Stub::new("quiet", Behavior::Silent)),
                Arc::new(Stub::new("broken", Behavior::Fail(FailureKind::Parse))),
            ],
            repo.clone(),
            policy(5, 1),
        );

        let indicator = domain("evil.example");
        let results = orch.enrich_indicator(&indicator).await;

        let keys: Vec<&str> = results.keys().collect();
        assert_eq!(keys, vec!["test:slow", "test:high", "test:quiet", "test:broken"]);
        assert_eq!(results.get("test:high").unwrap().score, Some(9.5));
        assert_eq!(results.get("test:quiet").unwrap().score, None);
        assert!(!results.get("test:broken").unwrap().success);

        assert_eq!(repo.results_for(indicator.id).await.unwrap().len(), 4);
        let summary = orch.summary(indicator.id).await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.max_score, 9.5);
    }

    #[tokio::test]
    async fn test_no_applicable_adapters() {
        let orch = orchestrator(
            vec![Arc::new(Stub::new("a", Behavior::Score(1.0)))],
            InMemoryRepository::shared(),
            policy(5, 1),
        );
        let results = orch
            .enrich_indicator(&Indicator::new(IndicatorType::Email, "a@b.example"))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_uses_every_attempt() {
        let stub = Arc::new(Stub::new("flaky", Behavior::Fail(FailureKind::TransientNetwork)));
        let orch = orchestrator(vec![stub.clone()], InMemoryRepository::shared(), policy(5, 3));

        let result = orch.enrich_indicator(&domain("a.example")).await;
        let result = result.get("test:flaky").unwrap();

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::TransientNetwork));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_runs_once() {
        let stub = Arc::new(Stub::new("nokey", Behavior::Fail(FailureKind::ConfigurationMissing)));
        let orch = orchestrator(vec![stub.clone()], InMemoryRepository::shared(), policy(5, 3));

        orch.enrich_indicator(&domain("a.example")).await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let stub = Arc::new(Stub::new("flaky", Behavior::FailFirst(1, FailureKind::RateLimited)));
        let orch = orchestrator(vec![stub.clone()], InMemoryRepository::shared(), policy(5, 3));

        let results = orch.enrich_indicator(&domain("a.example")).await;
        let result = results.get("test:flaky").unwrap();
        assert!(result.success);
        assert_eq!(result.score, Some(5.0));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_score_is_not_retried() {
        let stub = Arc::new(Stub::new("quiet", Behavior::Silent));
        let orch = orchestrator(vec![stub.clone()], InMemoryRepository::shared(), policy(5, 3));

        let results = orch.enrich_indicator(&domain("a.example")).await;
        let result = results.get("test:quiet").unwrap();

        assert!(result.success);
        assert_eq!(result.score, None);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_persistence_does_not_stall_siblings() {
        let flaky = Arc::new(Stub::new("flaky", Behavior::FailFirst(1, FailureKind::TransientNetwork)));
        let repository = Arc::new(SlowRepository {
            delay: Duration::from_secs(5),
            inner: InMemoryRepository::new(),
        });
        let orch = orchestrator(
            vec![Arc::new(Stub::new("fast", Behavior::Score(7.0))), flaky.clone()],
            repository.clone(),
            policy(5, 3),
        );

        let indicator = domain("a.example");
        let started = tokio::time::Instant::now();
        let results = orch.enrich_indicator(&indicator).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 2);
        assert!(results.get("test:flaky").unwrap().success);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        // both saves overlap; serialized saves would take at least 10s
        assert!(elapsed < Duration::from_secs(6), "took {:?}", elapsed);
        assert_eq!(repository.results_for(indicator.id).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_block_siblings() {
        let hang = Arc::new(Stub::new("hang", Behavior::Hang));
        let fast = Arc::new(Stub::new("fast", Behavior::Score(7.0)));
        let orch = orchestrator(
            vec![hang.clone(), fast],
            InMemoryRepository::shared(),
            policy(5, 2),
        );

        let results = orch.enrich_indicator(&domain("a.example")).await;

        let hung = results.get("test:hang").unwrap();
        assert_eq!(hung.failure, Some(FailureKind::Timeout));
        assert_eq!(hang.calls.load(Ordering::SeqCst), 2);
        assert_eq!(results.get("test:fast").unwrap().score, Some(7.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_adapter_is_contained() {
        let boom = Arc::new(Stub::new("boom", Behavior::Panic));
        let ok = Arc::new(Stub::new("ok", Behavior::Score(3.0)));
        let orch = orchestrator(vec![boom.clone(), ok], InMemoryRepository::shared(), policy(5, 2));

        let results = orch.enrich_indicator(&domain("a.example")).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results.get("test:boom").unwrap().failure, Some(FailureKind::Internal));
        assert_eq!(boom.calls.load(Ordering::SeqCst), 2);
        assert!(results.get("test:ok").unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling_single_indicator() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let adapters = (0..10)
            .map(|i| {
                Arc::new(
                    Stub::new(&format!("a{}", i), Behavior::Score(1.0)).tracked(
                        Duration::from_millis(50),
                        &in_flight,
                        &peak,
                    ),
                )
            })
            .collect();
        let orch = orchestrator(adapters, InMemoryRepository::shared(), policy(3, 1));

        let results = orch.enrich_indicator(&domain("a.example")).await;

        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling_shared_by_batch() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let adapters = (0..3)
            .map(|i| {
                Arc::new(
                    Stub::new(&format!("a{}", i), Behavior::Score(1.0)).tracked(
                        Duration::from_millis(50),
                        &in_flight,
                        &peak,
                    ),
                )
            })
            .collect();
        let orch = orchestrator(adapters, InMemoryRepository::shared(), policy(2, 1));

        let indicators: Vec<Indicator> = (0..4).map(|i| domain(&format!("d{}.example", i))).collect();
        let batch = orch.enrich_batch(&indicators).await;

        assert_eq!(batch.len(), 4);
        assert!(batch.values().all(|set| set.len() == 3));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed() {
        let orch = orchestrator(
            vec![Arc::new(Stub::new("a", Behavior::Score(4.0)))],
            Arc::new(FailingRepository),
            policy(5, 1),
        );

        let indicator = domain("a.example");
        let results = orch.enrich_indicator(&indicator).await;
        assert_eq!(results.len(), 1);
        assert!(orch.summary(indicator.id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_partial_failure() {
        let orch = orchestrator(
            vec![
                Arc::new(Stub::new("dns", Behavior::Score(6.0)).only(IndicatorType::Domain)),
                Arc::new(
                    Stub::new("rep", Behavior::Fail(FailureKind::TransientNetwork))
                        .only(IndicatorType::Ip),
                ),
            ],
            InMemoryRepository::shared(),
            policy(5, 2),
        );
        let indicators = vec![
            domain("one.example"),
            Indicator::new(IndicatorType::Ip, "198.51.100.7"),
            domain("three.example"),
        ];

        let batch = orch.enrich_batch(&indicators).await;

        assert_eq!(batch.len(), 3);
        assert!(batch[&indicators[0].id].get("test:dns").unwrap().success);
        assert!(batch[&indicators[2].id].get("test:dns").unwrap().success);
        let failed = batch[&indicators[1].id].get("test:rep").unwrap();
        assert!(!failed.success);
        assert!(failed.error_message.is_some());
    }

    #[tokio::test]
    async fn test_batch_isolates_failed_indicator() {
        let good = domain("good.example");
        let bad = domain("bad.example");
        let repository = Arc::new(PoisonedRepository {
            poisoned: bad.id,
            inner: InMemoryRepository::new(),
        });
        let orch = orchestrator(
            vec![Arc::new(Stub::new("a", Behavior::Score(6.0)))],
            repository,
            policy(5, 1),
        );

        let batch = orch.enrich_batch(&[good.clone(), bad.clone()]).await;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[&good.id].len(), 1);
        assert!(batch[&bad.id].is_empty());
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = ExecutionPolicy::from(&EnrichmentSettings::default());
        assert_eq!(policy.max_concurrent, 5);
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
    }
}
