//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, with periodic tick
//! callbacks. [`GcRunnable`] plugs tombstone garbage collection into it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::context::CallContext;
use crate::error::BrokerResult;
use crate::storage::RecordStore;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The spawned task interleaves queued tasks with periodic `on_tick` calls
/// and runs `shutdown` once when stopped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker. The task queue holds up to 256 pending tasks.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(tick_interval);
            // The first tick completes immediately; skip it.
            ticks.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = ticks.tick() => runnable.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Garbage collection
// ---------------------------------------------------------------------------

/// Reply channel for an on-demand collection pass.
pub type GcReply = oneshot::Sender<BrokerResult<usize>>;

/// Task variants for the garbage collection worker.
#[derive(Debug)]
pub enum GcTask {
    /// Run a pass now using the configured retention.
    RunNow { reply: Option<GcReply> },
    /// Run a pass purging tombstones deleted at or before `cutoff` (epoch ms).
    RunWithCutoff { cutoff: u64, reply: Option<GcReply> },
}

/// Purges expired tombstones from one store on every tick.
///
/// Interval, retention, and per-pass timeout come from the store's
/// [`GcConfig`](crate::GcConfig).
pub struct GcRunnable {
    store: Arc<RecordStore>,
}

impl GcRunnable {
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Starts a worker that collects every configured interval.
    pub fn spawn(self) -> BackgroundWorker<Self> {
        let interval = self.store.gc_config().interval;
        BackgroundWorker::start(self, interval)
    }

    async fn collect(&self, cutoff: Option<u64>) -> BrokerResult<usize> {
        let ctx = CallContext::with_timeout(self.store.gc_config().pass_timeout);
        let result = match cutoff {
            Some(cutoff) => self.store.clear_deleted(&ctx, cutoff).await,
            None => self.store.clear_expired(&ctx).await,
        };
        if let Err(error) = &result {
            tracing::warn!(
                record_type = %self.store.record_type(),
                ?cutoff,
                error = %error,
                "garbage collection pass failed"
            );
        }
        result
    }
}

#[async_trait]
impl BackgroundRunnable for GcRunnable {
    type Task = GcTask;

    async fn run(&mut self, task: GcTask) {
        let (cutoff, reply) = match task {
            GcTask::RunNow { reply } => (None, reply),
            GcTask::RunWithCutoff { cutoff, reply } => (Some(cutoff), reply),
        };
        let result = self.collect(cutoff).await;
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn on_tick(&mut self) {
        let _ = self.collect(None).await;
    }

    async fn shutdown(&mut self) {
        tracing::debug!(record_type = %self.store.record_type(), "garbage collector stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
