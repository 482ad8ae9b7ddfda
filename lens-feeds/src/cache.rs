//! Single-flight feed cache
//!
//! Amortizes an expensive bulk download across many per-indicator lookups:
//! - A fresh entry is served without I/O or suspension
//! - A stale entry is refreshed by exactly one caller, the others wait
//!   on the per-key lock and read what the winner wrote
//! - A failed refresh keeps serving the previous dataset; only a cache that
//!   never loaded anything reports [`CacheError::Unavailable`]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lens_core::FailureKind;

/// Errors from the feed cache
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Feed '{key}' unavailable: {reason}")]
    Unavailable { key: String, reason: String },
}

impl CacheError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::CacheUnavailable
    }
}

/// A cached dataset and when it was fetched
#[derive(Debug)]
pub struct FeedCacheEntry<T> {
    pub dataset: Arc<T>,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    loaded: Instant,
}

impl<T> FeedCacheEntry<T> {
    fn new(dataset: Arc<T>, ttl: Duration) -> Self {
        Self {
            dataset,
            fetched_at: Utc::now(),
            ttl,
            loaded: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.loaded.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }
}

/// Per-key state: current entry, refresh lock and attempt counter
struct Slot<T> {
    entry: RwLock<Option<FeedCacheEntry<T>>>,
    refresh: Mutex<()>,
    /// Bumped after every refresh attempt, successful or not
    attempts: AtomicU64,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    fn fresh(&self) -> Option<Arc<T>> {
        self.entry
            .read()
            .as_ref()
            .filter(|e| e.is_fresh())
            .map(|e| Arc::clone(&e.dataset))
    }

    fn current(&self) -> Option<Arc<T>> {
        self.entry.read().as_ref().map(|e| Arc::clone(&e.dataset))
    }
}

/// Time-bounded cache of bulk datasets keyed by feed name
pub struct FeedCache<T> {
    ttl: Duration,
    slots: DashMap<String, Arc<Slot<T>>>,
    fetches: AtomicU64,
}

impl<T: Send + Sync + 'static> FeedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, key: &str) -> Arc<Slot<T>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(&slot);
        }
        Arc::clone(
            &self
                .slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Get the dataset for `key`, refreshing it with `fetch` when stale
    ///
    /// `fetch` runs at most once per call and only for the caller that wins
    /// the refresh lock while the entry is still stale.
    pub async fn get<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Arc<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let slot = self.slot(key);

        if let Some(dataset) = slot.fresh() {
            return Ok(dataset);
        }

        let seen_attempts = slot.attempts.load(Ordering::Acquire);
        let _guard = slot.refresh.lock().await;

        if let Some(dataset) = slot.fresh() {
            debug!(feed = %key, "Feed refreshed by another caller");
            return Ok(dataset);
        }

        // Someone else attempted while we waited and failed; share their outcome
        if slot.attempts.load(Ordering::Acquire) != seen_attempts {
            return slot.current().ok_or_else(|| CacheError::Unavailable {
                key: key.to_string(),
                reason: "concurrent refresh failed".to_string(),
            });
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = fetch().await;
        slot.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(dataset) => {
                let dataset = Arc::new(dataset);
                *slot.entry.write() = Some(FeedCacheEntry::new(Arc::clone(&dataset), self.ttl));
                info!(feed = %key, "Feed refreshed");
                Ok(dataset)
            }
            Err(e) => match slot.current() {
                Some(stale) => {
                    warn!(feed = %key, error = %e, "Feed refresh failed, serving stale dataset");
                    Ok(stale)
                }
                None => {
                    warn!(feed = %key, error = %e, "Feed refresh failed, no dataset cached");
                    Err(CacheError::Unavailable {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
                }
            },
        }
    }

    /// Current dataset regardless of age, without fetching
    pub fn peek(&self, key: &str) -> Option<Arc<T>> {
        self.slots.get(key).and_then(|slot| slot.current())
    }

    /// When the current dataset for `key` was fetched
    pub fn fetched_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.slots
            .get(key)
            .and_then(|slot| slot.entry.read().as_ref().map(|e| e.fetched_at))
    }

    /// Drop the dataset for `key`; the next `get` fetches again
    pub fn invalidate(&self, key: &str) {
        if let Some(slot) = self.slots.get(key) {
            *slot.entry.write() = None;
        }
    }

    /// Number of downstream fetches performed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
