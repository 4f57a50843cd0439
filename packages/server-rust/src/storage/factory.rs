//! Factory for [`RecordStore`] instances sharing one backend.
//!
//! [`RecordStoreFactory`] is the dependency injection point: it holds the
//! backend, a configuration template, and the clock, and hands out one
//! store per record type. Stores are cached so every caller asking for the
//! same record type shares its watchers.

use std::sync::Arc;

use dashmap::DashMap;
use databroker_core::{ClockSource, SystemClock};

use crate::backend::KvBackend;
use crate::config::BrokerConfig;
use crate::error::BrokerResult;
use crate::storage::record_store::RecordStore;

/// Creates and caches [`RecordStore`]s keyed by record type.
pub struct RecordStoreFactory {
    backend: Arc<dyn KvBackend>,
    template: BrokerConfig,
    clock: Arc<dyn ClockSource>,
    stores: DashMap<String, Arc<RecordStore>>,
}

impl RecordStoreFactory {
    /// Creates a factory. `template` supplies every setting except the record type.
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, template: BrokerConfig) -> Self {
        Self {
            backend,
            template,
            clock: Arc::new(SystemClock),
            stores: DashMap::new(),
        }
    }

    /// Replaces the clock handed to stores created from now on.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the store for `record_type`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidConfig`](crate::BrokerError::InvalidConfig)
    /// if `record_type` is not a valid namespace.
    pub fn create(&self, record_type: &str) -> BrokerResult<Arc<RecordStore>> {
        if let Some(store) = self.stores.get(record_type) {
            return Ok(Arc::clone(store.value()));
        }

        let config = BrokerConfig {
            record_type: record_type.to_string(),
            ..self.template.clone()
        };
        let store = RecordStore::new(Arc::clone(&self.backend), &config)?
            .with_clock(Arc::clone(&self.clock));

        // Another caller may have raced us; keep whichever landed first.
        let store = Arc::clone(
            self.stores
                .entry(record_type.to_string())
                .or_insert_with(|| Arc::new(store))
                .value(),
        );
        tracing::debug!(record_type, "record store ready");
        Ok(store)
    }

    /// Record types with a live store.
    #[must_use]
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
