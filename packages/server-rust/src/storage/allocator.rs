//! Version allocation over the backend's atomic counter.

use std::sync::Arc;

use databroker_core::Version;

use crate::backend::KvBackend;
use crate::context::CallContext;
use crate::error::{BrokerError, BrokerResult};
use crate::storage::keys::KeyLayout;

/// Hands out strictly increasing versions for one namespace.
///
/// Every call is an increment on the shared counter key, so processes that
/// share a backend draw from the same sequence. Nothing is cached locally.
/// Versions are unique and monotonic but not contiguous: a write that fails
/// after allocating leaves a gap.
pub struct VersionAllocator {
    backend: Arc<dyn KvBackend>,
    counter_key: String,
}

impl VersionAllocator {
    /// Creates an allocator for the namespace described by `layout`.
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, layout: &KeyLayout) -> Self {
        Self {
            backend,
            counter_key: layout.counter_key(),
        }
    }

    /// Allocates the next version.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::VersionOverflow`] once the counter no longer
    /// fits the token width, or the context/backend error.
    pub async fn next(&self, ctx: &CallContext) -> BrokerResult<Version> {
        let counter = ctx.run(self.backend.incr(&self.counter_key)).await?;
        Version::from_counter(counter).map_err(|e| {
            tracing::error!(counter_key = %self.counter_key, counter, "version counter out of range");
            BrokerError::VersionOverflow(e)
        })
    }
}
