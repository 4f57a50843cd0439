//! Backend wrapper with hooks for interleaving tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{ChangeStream, InMemoryBackend, KvBackend};

struct Gate {
    key: String,
    deleting: bool,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// Control side of a paused compare-and-swap.
pub(crate) struct GateHandle {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl GateHandle {
    /// Waits until the gated call is parked.
    pub(crate) async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the gated call proceed.
    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

/// Delegates to an [`InMemoryBackend`], optionally pausing one
/// compare-and-swap or cancelling a token on the nth range scan.
pub(crate) struct HookedBackend {
    inner: Arc<InMemoryBackend>,
    gate: Mutex<Option<Gate>>,
    cancel_on_scan: Mutex<Option<(usize, CancellationToken)>>,
    scans: AtomicUsize,
}

impl HookedBackend {
    pub(crate) fn new(inner: Arc<InMemoryBackend>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
            cancel_on_scan: Mutex::new(None),
            scans: AtomicUsize::new(0),
        }
    }

    pub(crate) fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Pauses the next compare-and-swap on `key` that deletes (`deleting`)
    /// or writes (`!deleting`). The swap's expected value is already fixed
    /// when it parks.
    pub(crate) fn gate_swap(&self, key: &str, deleting: bool) -> GateHandle {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock() = Some(Gate {
            key: key.to_string(),
            deleting,
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        GateHandle { reached, release }
    }

    /// Cancels `token` once the `nth` range scan (1-based) has returned.
    pub(crate) fn cancel_on_scan(&self, nth: usize, token: CancellationToken) {
        *self.cancel_on_scan.lock() = Some((nth, token));
    }

    fn take_gate(&self, key: &str, deleting: bool) -> Option<Gate> {
        let mut slot = self.gate.lock();
        if slot
            .as_ref()
            .is_some_and(|g| g.key == key && g.deleting == deleting)
        {
            slot.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl KvBackend for HookedBackend {
    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        self.inner.incr(key).await
    }

    async fn set_blob(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.inner.set_blob(key, value, ttl).await
    }

    async fn get_blob(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        self.inner.get_blob(key).await
    }

    async fn delete_blob(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.delete_blob(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Bytes>,
        new: Option<Bytes>,
    ) -> anyhow::Result<bool> {
        if let Some(gate) = self.take_gate(key, new.is_none()) {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn scan_range(
        &self,
        from: &str,
        to: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, Bytes)>> {
        let n = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.inner.scan_range(from, to, limit).await;
        let token = self
            .cancel_on_scan
            .lock()
            .as_ref()
            .filter(|(nth, _)| *nth == n)
            .map(|(_, token)| token.clone());
        if let Some(token) = token {
            token.cancel();
        }
        result
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> anyhow::Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<ChangeStream> {
        self.inner.subscribe(channel).await
    }
}
