//! In-memory [`KvBackend`] implementation.
//!
//! Blobs live in a [`BTreeMap`] so range scans come back in key order, the
//! same way a remote sorted keyspace would return them. Counters use
//! [`DashMap`] entries so increments are atomic per key. Pub/sub channels
//! are tokio broadcast channels created on first use.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{ChangeStream, KvBackend};

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct StoredBlob {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredBlob {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local key-value store with the semantics of a remote one.
///
/// [`set_offline`](Self::set_offline) makes every call fail, standing in
/// for a lost connection.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    counters: DashMap<String, i64>,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    offline: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches simulated connectivity. While offline every call errors.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drops every blob and counter. Subscriptions stay open.
    pub fn flush_all(&self) {
        self.blobs.write().clear();
        self.counters.clear();
    }

    /// Overwrites the counter at `key`, as a plain `SET` on a counter key would.
    pub fn set_counter(&self, key: &str, value: i64) {
        self.counters.insert(key.to_string(), value);
    }

    /// Number of live blobs currently stored.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        let now = Instant::now();
        self.blobs.read().values().filter(|b| b.is_live(now)).count()
    }

    /// Stores raw bytes directly, bypassing the async interface.
    pub fn insert_raw(&self, key: &str, value: impl Into<Bytes>) {
        self.blobs.write().insert(
            key.to_string(),
            StoredBlob {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    fn ensure_online(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("backend connection lost");
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        self.ensure_online()?;
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("counter {key} overflowed"))?;
        Ok(*counter)
    }

    async fn set_blob(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.ensure_online()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.blobs
            .write()
            .insert(key.to_string(), StoredBlob { value, expires_at });
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        self.ensure_online()?;
        let now = Instant::now();
        let found = self.blobs.read().get(key).cloned();
        match found {
            Some(blob) if blob.is_live(now) => Ok(Some(blob.value)),
            Some(_) => {
                // Expired: drop lazily, unless it was replaced in the meantime.
                let mut blobs = self.blobs.write();
                if blobs.get(key).is_some_and(|b| !b.is_live(now)) {
                    blobs.remove(key);
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_blob(&self, key: &str) -> anyhow::Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .blobs
            .write()
            .remove(key)
            .is_some_and(|b| b.is_live(now)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Bytes>,
        new: Option<Bytes>,
    ) -> anyhow::Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut blobs = self.blobs.write();
        let current = blobs
            .get(key)
            .filter(|b| b.is_live(now))
            .map(|b| &b.value);
        if current != expected.as_ref() {
            return Ok(false);
        }
        match new {
            Some(value) => {
                blobs.insert(
                    key.to_string(),
                    StoredBlob {
                        value,
                        expires_at: None,
                    },
                );
            }
            None => {
                blobs.remove(key);
            }
        }
        Ok(true)
    }

    async fn scan_range(
        &self,
        from: &str,
        to: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, Bytes)>> {
        self.ensure_online()?;
        if limit == 0 || from >= to {
            return Ok(Vec::new());
        }
        let now = Instant::now();
        let blobs = self.blobs.read();
        Ok(blobs
            .range::<str, _>((Bound::Included(from), Bound::Excluded(to)))
            .filter(|(_, blob)| blob.is_live(now))
            .take(limit)
            .map(|(key, blob)| (key.clone(), blob.value.clone()))
            .collect())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> anyhow::Result<()> {
        self.ensure_online()?;
        if let Some(tx) = self.channels.get(channel) {
            // No subscribers is not an error for pub/sub.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<ChangeStream> {
        self.ensure_online()?;
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let messages = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    // Lagging only loses intermediate payloads; subscribers
                    // treat messages as wake-ups, so keep going.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(messages.boxed())
    }
}
