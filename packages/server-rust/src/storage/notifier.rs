//! Change notification fan-out.
//!
//! [`ChangeNotifier`] keeps one capacity-one channel per watcher. A write
//! calls [`notify`](ChangeNotifier::notify), which `try_send`s a unit signal
//! to every watcher: if a signal is already pending the send is a no-op, so
//! bursts of writes coalesce and a slow watcher never blocks a writer.
//! Signals carry no payload; watchers re-read with
//! [`RecordStore::list`](crate::storage::RecordStore::list).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::ChangeStream;
use crate::context::CallContext;

/// Unique identifier for a watcher, assigned by the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub u64);

/// Sending half of one watcher's channel plus the context it watches under.
#[derive(Debug)]
struct WatcherSlot {
    tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

/// Fan-out of coalescing "something changed" signals.
#[derive(Debug)]
pub struct ChangeNotifier {
    watchers: DashMap<WatcherId, WatcherSlot>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    /// Creates a notifier with no watchers.
    ///
    /// Watcher IDs start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watchers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new watcher.
    ///
    /// The watcher stops yielding signals once `ctx` is cancelled and is
    /// unregistered when dropped.
    #[must_use]
    pub fn watch(self: &Arc<Self>, ctx: &CallContext) -> Watcher {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(1);
        let cancel = ctx.token().clone();
        self.watchers.insert(
            id,
            WatcherSlot {
                tx,
                cancel: cancel.clone(),
            },
        );
        tracing::debug!(watcher = id.0, "watcher registered");

        Watcher {
            id,
            rx,
            cancel,
            notifier: Arc::downgrade(self),
        }
    }

    /// Signals every active watcher without blocking.
    ///
    /// Watchers whose receiver is gone or whose context was cancelled are pruned.
    pub fn notify(&self) {
        self.watchers.retain(|id, slot| {
            if slot.cancel.is_cancelled() {
                tracing::debug!(watcher = id.0, "pruning cancelled watcher");
                return false;
            }
            match slot.tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => true,
                Err(TrySendError::Closed(())) => {
                    tracing::debug!(watcher = id.0, "pruning closed watcher");
                    false
                }
            }
        });
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Forwards every message on `changes` into [`notify`](Self::notify).
    ///
    /// Lets local watchers observe writes made by other processes sharing the
    /// backend. The task ends when `shutdown` is cancelled or the stream ends.
    pub fn spawn_relay(
        self: &Arc<Self>,
        mut changes: ChangeStream,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let notifier = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = changes.next() => {
                        let Some(_) = message else {
                            tracing::warn!("change subscription closed");
                            break;
                        };
                        match notifier.upgrade() {
                            Some(notifier) => notifier.notify(),
                            None => break,
                        }
                    }
                }
            }
        })
    }

    fn unregister(&self, id: WatcherId) {
        if self.watchers.remove(&id).is_some() {
            tracing::debug!(watcher = id.0, "watcher unregistered");
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a watch subscription.
///
/// Holds at most one pending signal. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Watcher {
    id: WatcherId,
    rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    notifier: Weak<ChangeNotifier>,
}

impl Watcher {
    /// This watcher's identifier.
    #[must_use]
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Waits for the next change signal.
    ///
    /// Returns `None` once the watch context is cancelled or the notifier is gone.
    pub async fn changed(&mut self) -> Option<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            signal = self.rx.recv() => signal,
        }
    }

    /// Consumes a pending signal without waiting. Returns whether one was pending.
    pub fn try_changed(&mut self) -> bool {
        !self.cancel.is_cancelled() && self.rx.try_recv().is_ok()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.unregister(self.id);
        }
    }
}
