//! Backing key-value store adapter.
//!
//! Defines [`KvBackend`], the thin contract the record store needs from a
//! remote key-value store: an atomic counter, blob get/set/delete,
//! lexicographic range scans, and publish/subscribe. Connection management,
//! pooling, and TLS belong to the implementation.
//!
//! [`InMemoryBackend`] implements the contract in-process for tests and
//! single-node embedding.

mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use memory::InMemoryBackend;

/// Stream of payloads published on a pub/sub channel.
pub type ChangeStream = BoxStream<'static, Bytes>;

/// Remote key-value store with atomic counters and pub/sub.
///
/// Used as `Arc<dyn KvBackend>`, shared by every caller of a
/// [`RecordStore`](crate::storage::RecordStore). Implementations must be
/// safe for concurrent use; no operation may hold locks across calls.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Atomically increments the counter at `key` and returns the new value.
    ///
    /// A missing counter starts at 0, so the first call returns 1.
    async fn incr(&self, key: &str) -> anyhow::Result<i64>;

    /// Stores `value` at `key`, replacing any previous value.
    ///
    /// With `ttl`, the key disappears once the duration elapses.
    async fn set_blob(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Loads the value at `key`, or `None` if absent or expired.
    async fn get_blob(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    /// Removes `key`. Returns whether a value was present.
    async fn delete_blob(&self, key: &str) -> anyhow::Result<bool>;

    /// Atomically replaces the value at `key` if it currently equals `expected`.
    ///
    /// `expected == None` requires the key to be absent; `new == None`
    /// deletes it. Returns whether the swap was applied. Remote stores
    /// implement this with an optimistic transaction or a server-side script.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Bytes>,
        new: Option<Bytes>,
    ) -> anyhow::Result<bool>;

    /// Returns up to `limit` entries with `from <= key < to`, ascending by key.
    async fn scan_range(
        &self,
        from: &str,
        to: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, Bytes)>>;

    /// Publishes `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> anyhow::Result<()>;

    /// Subscribes to `channel`. Only messages published afterwards are delivered.
    async fn subscribe(&self, channel: &str) -> anyhow::Result<ChangeStream>;
}
