//! Adapter registry
//!
//! Built once before traffic and then shared read-only behind an `Arc`.

use tracing::{debug, info};

use lens_adapters::SharedAdapter;
use lens_core::{adapter_key, IndicatorType};

/// Registered adapters, in registration order
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<SharedAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; an adapter with the same key is replaced in place
    pub fn register(&mut self, adapter: SharedAdapter) {
        let key = adapter.key();
        match self.adapters.iter_mut().find(|a| a.key() == key) {
            Some(existing) => {
                debug!(adapter = %key, "Replacing registered adapter");
                *existing = adapter;
            }
            None => {
                info!(adapter = %key, "Registered adapter");
                self.adapters.push(adapter);
            }
        }
    }

    /// Adapters applicable to an indicator type, in registration order
    pub fn adapters_for(&self, indicator_type: IndicatorType) -> Vec<SharedAdapter> {
        self.adapters
            .iter()
            .filter(|a| a.is_applicable(indicator_type))
            .cloned()
            .collect()
    }

    pub fn get(&self, enrichment_type: &str, provider: &str) -> Option<SharedAdapter> {
        let key = adapter_key(enrichment_type, provider);
        self.adapters.iter().find(|a| a.key() == key).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
