//! Versioned record store for one record-type namespace.
//!
//! [`RecordStore`] layers get/put/delete/list semantics, soft deletes, and
//! garbage collection on top of a [`KvBackend`]. Every write allocates a
//! fresh [`Version`] from the shared counter, writes an index entry keyed
//! by that version, installs the record with a compare-and-swap, and
//! finally wakes watchers.
//!
//! Index entries hold the full encoded record. Readers resolve each entry
//! against the record it names and keep it only when the versions agree;
//! garbage collection prunes entries that can no longer agree. Every
//! mutation of a record key is a compare-and-swap, so writers and the
//! collector never overwrite a value they did not read, in this process or
//! any other sharing the backend.

use std::sync::Arc;

use bytes::Bytes;
use databroker_core::{
    decode_record, encode_record, ClockSource, Record, SystemClock, TypedData, Version,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::KvBackend;
use crate::config::{BrokerConfig, GcConfig};
use crate::context::CallContext;
use crate::error::{BrokerError, BrokerResult};
use crate::storage::allocator::VersionAllocator;
use crate::storage::keys::KeyLayout;
use crate::storage::notifier::{ChangeNotifier, Watcher};

/// Resume point for [`RecordStore::list_page`].
///
/// Opaque apart from [`PageCursor::after`]; pass
/// [`ListPage::next_cursor`] back in to continue a listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageCursor(Resume);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resume {
    AfterVersion(Version),
    FromKey(String),
}

impl Default for Resume {
    fn default() -> Self {
        Self::AfterVersion(Version::ZERO)
    }
}

impl PageCursor {
    /// A cursor yielding records with versions greater than `version`.
    #[must_use]
    pub fn after(version: Version) -> Self {
        Self(Resume::AfterVersion(version))
    }
}

impl From<Version> for PageCursor {
    fn from(version: Version) -> Self {
        Self::after(version)
    }
}

/// One page of a version-ordered listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Records in ascending version order.
    pub records: Vec<Record>,
    /// Cursor for the next page. Always advances past every index key this
    /// page scanned, including malformed ones.
    pub next_cursor: PageCursor,
    /// Whether the scan reached the end of the index.
    pub finished: bool,
}

/// A parsed entry of the version index.
#[derive(Debug)]
struct IndexEntry {
    key: String,
    version: Version,
    record: Record,
}

/// One batch of the version index.
struct IndexBatch {
    entries: Vec<IndexEntry>,
    /// Scan start that skips every key in this batch.
    next_from: Option<String>,
    exhausted: bool,
}

/// Result of installing a record blob.
enum Install {
    /// A greater version is already stored; nothing was written.
    Superseded,
    /// Written over the given previous version, if any.
    Replaced(Option<Version>),
}

/// Versioned, change-notifying record store.
///
/// Shared as `Arc<RecordStore>`; all operations take `&self` and are safe to
/// call concurrently.
pub struct RecordStore {
    layout: KeyLayout,
    backend: Arc<dyn KvBackend>,
    allocator: VersionAllocator,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn ClockSource>,
    batch_size: usize,
    gc: GcConfig,
}

impl RecordStore {
    /// Creates a store for `config.record_type` over `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidConfig`] if `config` fails validation.
    pub fn new(backend: Arc<dyn KvBackend>, config: &BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        let layout = KeyLayout::new(&config.record_type);
        Ok(Self {
            allocator: VersionAllocator::new(Arc::clone(&backend), &layout),
            layout,
            backend,
            notifier: Arc::new(ChangeNotifier::new()),
            clock: Arc::new(SystemClock),
            batch_size: config.list_batch_size,
            gc: config.gc.clone(),
        })
    }

    /// Replaces the clock used for record timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// The namespace this store manages.
    #[must_use]
    pub fn record_type(&self) -> &str {
        self.layout.record_type()
    }

    /// Garbage collection settings this store was built with.
    #[must_use]
    pub fn gc_config(&self) -> &GcConfig {
        &self.gc
    }

    // --- Reads ---

    /// Returns the stored record for `id`, tombstoned or not.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if nothing is stored under `id`,
    /// [`BrokerError::Corrupt`] if the stored blob does not decode, or the
    /// context/backend error.
    pub async fn get(&self, ctx: &CallContext, id: &str) -> BrokerResult<Record> {
        self.read(ctx, id)
            .await?
            .ok_or_else(|| BrokerError::NotFound { id: id.to_string() })
    }

    /// Returns every record with a version greater than `since`, ascending.
    ///
    /// An empty `since` lists from the beginning. Tombstones are included.
    /// Records that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidVersion`] for a malformed cursor, or the
    /// context/backend error.
    pub async fn list(&self, ctx: &CallContext, since: &str) -> BrokerResult<Vec<Record>> {
        let since = Version::parse_cursor(since).map_err(BrokerError::InvalidVersion)?;
        let (mut from, to) = self.layout.versions_after(since);
        let mut records = Vec::new();
        loop {
            let batch = self.scan_index(ctx, &from, &to, self.batch_size).await?;
            self.resolve_entries(ctx, batch.entries, &mut records).await?;
            match batch.next_from {
                Some(next) if !batch.exhausted => from = next,
                _ => return Ok(records),
            }
        }
    }

    /// Returns at most `limit` index entries' worth of records after `cursor`.
    ///
    /// Stale and malformed index entries count toward `limit`, so a page may
    /// hold fewer records than `limit` without being the last one.
    ///
    /// # Errors
    ///
    /// Returns the context/backend error.
    pub async fn list_page(
        &self,
        ctx: &CallContext,
        cursor: &PageCursor,
        limit: usize,
    ) -> BrokerResult<ListPage> {
        let (_, to) = self.layout.versions_after(Version::ZERO);
        let from = match &cursor.0 {
            Resume::AfterVersion(v) => self.layout.versions_after(*v).0,
            Resume::FromKey(key) => key.clone(),
        };
        let batch = self.scan_index(ctx, &from, &to, limit.max(1)).await?;
        let mut records = Vec::with_capacity(batch.entries.len());
        self.resolve_entries(ctx, batch.entries, &mut records).await?;
        Ok(ListPage {
            records,
            next_cursor: batch
                .next_from
                .map_or_else(|| cursor.clone(), |key| PageCursor(Resume::FromKey(key))),
            finished: batch.exhausted,
        })
    }

    // --- Writes ---

    /// Stores `data` under `id` with a new version.
    ///
    /// `created_at` carries over from any existing record, including a
    /// tombstone; otherwise it is the write time. Returns the record as
    /// written. If a concurrent writer already stored a greater version,
    /// that write wins and this one is dropped.
    ///
    /// # Errors
    ///
    /// Returns the context/backend error, or [`BrokerError::VersionOverflow`].
    /// Nothing is written when an error is returned before the commit.
    pub async fn put(&self, ctx: &CallContext, id: &str, data: TypedData) -> BrokerResult<Record> {
        let version = self.allocator.next(ctx).await?;
        let created_at = match self.read(ctx, id).await {
            Ok(existing) => existing.map(|r| r.created_at),
            Err(BrokerError::Corrupt { key, source }) => {
                tracing::warn!(
                    record_type = %self.record_type(),
                    key = %key,
                    error = %source,
                    "overwriting corrupt record"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let record = Record {
            id: id.to_string(),
            data,
            version,
            created_at: created_at.unwrap_or(now),
            modified_at: now,
            deleted_at: None,
        };
        self.commit(ctx, &record).await?;
        Ok(record)
    }

    /// Soft-deletes `id` by writing a tombstone with a new version.
    ///
    /// The tombstone keeps the last payload and stays visible to `get` and
    /// `list` until [`clear_deleted`](Self::clear_deleted) purges it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if `id` does not exist, or the
    /// context/backend error.
    pub async fn delete(&self, ctx: &CallContext, id: &str) -> BrokerResult<Record> {
        let existing = self.get(ctx, id).await?;
        let version = self.allocator.next(ctx).await?;
        let tombstone = existing.into_tombstone(version, self.clock.now());
        self.commit(ctx, &tombstone).await?;
        Ok(tombstone)
    }

    /// Physically removes tombstones whose `deleted_at` is at or before `cutoff`.
    ///
    /// Also prunes index entries that can no longer match their record:
    /// superseded ones at once, and ones whose write never landed after
    /// [`GcConfig::orphan_grace`]. Allocates no version and wakes no watcher.
    /// Cancellation is honoured between batches and between records; every
    /// record is either fully kept or fully removed, and a tombstone rewritten
    /// while the pass runs is kept. Returns the number of records purged.
    ///
    /// # Errors
    ///
    /// Returns the context/backend error. Records purged before the error
    /// stay purged.
    pub async fn clear_deleted(&self, ctx: &CallContext, cutoff: u64) -> BrokerResult<usize> {
        let (mut from, to) = self.layout.versions_after(Version::ZERO);
        let grace = u64::try_from(self.gc.orphan_grace.as_millis()).unwrap_or(u64::MAX);
        let orphan_cutoff = self.clock.now().saturating_sub(grace);
        let mut purged = 0_usize;
        loop {
            ctx.check()?;
            let batch = self.scan_index(ctx, &from, &to, self.batch_size).await?;
            for entry in batch.entries {
                match self.read(ctx, &entry.record.id).await {
                    Ok(Some(record)) if record.version == entry.version => {
                        if record.is_purgeable(cutoff) && self.purge(&record, &entry.key).await? {
                            purged += 1;
                        }
                    }
                    Ok(Some(record)) if record.version > entry.version => {
                        self.discard_index_entry(&entry.key).await;
                    }
                    // Missing or older record: the write is in flight or was abandoned.
                    Ok(_) => {
                        if entry.record.modified_at <= orphan_cutoff {
                            tracing::debug!(
                                record_type = %self.record_type(),
                                key = %entry.key,
                                "pruning orphaned index entry"
                            );
                            self.discard_index_entry(&entry.key).await;
                        }
                    }
                    Err(BrokerError::Corrupt { key, source }) => {
                        tracing::warn!(
                            record_type = %self.record_type(),
                            key = %key,
                            error = %source,
                            "skipping corrupt record during garbage collection"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            match batch.next_from {
                Some(next) if !batch.exhausted => from = next,
                _ => break,
            }
        }

        tracing::info!(
            record_type = %self.record_type(),
            purged,
            cutoff,
            "cleared deleted records"
        );
        Ok(purged)
    }

    /// Runs [`clear_deleted`](Self::clear_deleted) with the cutoff implied by
    /// [`GcConfig::retention`].
    ///
    /// # Errors
    ///
    /// As [`clear_deleted`](Self::clear_deleted).
    pub async fn clear_expired(&self, ctx: &CallContext) -> BrokerResult<usize> {
        let retention = u64::try_from(self.gc.retention.as_millis()).unwrap_or(u64::MAX);
        let cutoff = self.clock.now().saturating_sub(retention);
        self.clear_deleted(ctx, cutoff).await
    }

    // --- Notification ---

    /// Subscribes to change signals for this namespace.
    ///
    /// A signal means "something changed since you last looked"; call
    /// [`list`](Self::list) with your last seen version to find out what.
    #[must_use]
    pub fn watch(&self, ctx: &CallContext) -> Watcher {
        self.notifier.watch(ctx)
    }

    /// Relays writes announced by other processes sharing the backend to
    /// this store's watchers until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BackendUnavailable`] if the subscription fails.
    pub async fn start_change_relay(
        &self,
        shutdown: CancellationToken,
    ) -> BrokerResult<JoinHandle<()>> {
        let changes = self
            .backend
            .subscribe(&self.layout.changes_channel())
            .await?;
        Ok(self.notifier.spawn_relay(changes, shutdown))
    }

    // --- Internals ---

    async fn read(&self, ctx: &CallContext, id: &str) -> BrokerResult<Option<Record>> {
        let key = self.layout.record_key(id);
        let Some(bytes) = ctx.run(self.backend.get_blob(&key)).await? else {
            return Ok(None);
        };
        decode_record(&bytes)
            .map(Some)
            .map_err(|source| BrokerError::Corrupt { key, source })
    }

    /// Writes the index entry, installs the record, then drops the previous entry.
    ///
    /// The context is checked once up front; after that the steps run to
    /// completion so a departing caller cannot leave a half-written record.
    async fn commit(&self, ctx: &CallContext, record: &Record) -> BrokerResult<()> {
        let encoded = Bytes::from(encode_record(record).map_err(|source| BrokerError::Encode {
            id: record.id.clone(),
            source,
        })?);
        let record_key = self.layout.record_key(&record.id);
        let version_key = self.layout.version_key(record.version);
        ctx.check()?;

        self.backend
            .set_blob(&version_key, encoded.clone(), None)
            .await?;

        let previous = match self.install(&record_key, record.version, &encoded).await {
            Ok(Install::Replaced(previous)) => previous,
            Ok(Install::Superseded) => {
                tracing::debug!(
                    record_type = %self.record_type(),
                    id = %record.id,
                    version = %record.version,
                    "write superseded by a later version"
                );
                self.discard_index_entry(&version_key).await;
                return Ok(());
            }
            Err(e) => {
                self.discard_index_entry(&version_key).await;
                return Err(e);
            }
        };

        self.ensure_index_entry(&version_key, &encoded).await;
        if let Some(previous) = previous.filter(|v| *v != record.version) {
            self.discard_index_entry(&self.layout.version_key(previous))
                .await;
        }

        tracing::debug!(
            record_type = %self.record_type(),
            id = %record.id,
            version = %record.version,
            deleted = record.is_deleted(),
            "record committed"
        );
        self.announce(record.version).await;
        Ok(())
    }

    /// Swaps `encoded` into `record_key` unless a greater version is stored.
    ///
    /// Retries when another writer or the collector changes the key between
    /// the read and the swap.
    async fn install(
        &self,
        record_key: &str,
        version: Version,
        encoded: &Bytes,
    ) -> BrokerResult<Install> {
        loop {
            let current = self.backend.get_blob(record_key).await?;
            let current_version = current
                .as_deref()
                .and_then(|bytes| decode_record(bytes).ok())
                .map(|r| r.version);
            if current_version.is_some_and(|v| v > version) {
                return Ok(Install::Superseded);
            }
            if self
                .backend
                .compare_and_swap(record_key, current, Some(encoded.clone()))
                .await?
            {
                return Ok(Install::Replaced(current_version));
            }
            tracing::trace!(key = %record_key, "record changed during install; retrying");
        }
    }

    /// Rewrites a committed write's index entry if the collector pruned it
    /// while the write was stalled.
    async fn ensure_index_entry(&self, version_key: &str, encoded: &Bytes) {
        let restored = match self.backend.get_blob(version_key).await {
            Ok(Some(_)) => return,
            Ok(None) => self
                .backend
                .set_blob(version_key, encoded.clone(), None)
                .await,
            Err(e) => Err(e),
        };
        match restored {
            Ok(()) => tracing::debug!(key = %version_key, "restored pruned index entry"),
            Err(error) => tracing::warn!(
                record_type = %self.record_type(),
                key = %version_key,
                error = %error,
                "failed to verify index entry of committed write"
            ),
        }
    }

    /// Removes a tombstone unless it was rewritten since it was scanned.
    async fn purge(&self, record: &Record, index_key: &str) -> BrokerResult<bool> {
        let record_key = self.layout.record_key(&record.id);
        let Some(current) = self.backend.get_blob(&record_key).await? else {
            return Ok(false);
        };
        if decode_record(&current).ok().map(|r| r.version) != Some(record.version) {
            return Ok(false);
        }
        if !self
            .backend
            .compare_and_swap(&record_key, Some(current), None)
            .await?
        {
            tracing::debug!(
                record_type = %self.record_type(),
                id = %record.id,
                "tombstone rewritten during purge; keeping it"
            );
            return Ok(false);
        }
        self.discard_index_entry(index_key).await;
        tracing::debug!(
            record_type = %self.record_type(),
            id = %record.id,
            version = %record.version,
            "purged tombstone"
        );
        Ok(true)
    }

    async fn announce(&self, version: Version) {
        let payload = Bytes::from(version.to_string());
        if let Err(error) = self
            .backend
            .publish(&self.layout.changes_channel(), payload)
            .await
        {
            tracing::warn!(
                record_type = %self.record_type(),
                version = %version,
                error = %error,
                "failed to publish change"
            );
        }
        self.notifier.notify();
    }

    async fn discard_index_entry(&self, key: &str) {
        if let Err(error) = self.backend.delete_blob(key).await {
            tracing::warn!(
                record_type = %self.record_type(),
                key = %key,
                error = %error,
                "failed to remove index entry; garbage collection will retry"
            );
        }
    }

    /// Reads one batch of index entries in `[from, to)`.
    ///
    /// Resumption is key-based so malformed entries are skipped exactly once.
    async fn scan_index(
        &self,
        ctx: &CallContext,
        from: &str,
        to: &str,
        limit: usize,
    ) -> BrokerResult<IndexBatch> {
        let raw = ctx.run(self.backend.scan_range(from, to, limit)).await?;
        let exhausted = raw.len() < limit;
        let next_from = raw.last().map(|(key, _)| {
            let mut next = key.clone();
            next.push('\0');
            next
        });

        let entries = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let Some(version) = self.layout.parse_version_key(&key) else {
                    tracing::warn!(key = %key, "skipping malformed index key");
                    return None;
                };
                match decode_record(&value) {
                    Ok(record) if record.version == version => {
                        Some(IndexEntry { key, version, record })
                    }
                    _ => {
                        tracing::warn!(key = %key, "skipping undecodable index entry");
                        None
                    }
                }
            })
            .collect();
        Ok(IndexBatch {
            entries,
            next_from,
            exhausted,
        })
    }

    /// Appends the records that still carry each entry's version.
    async fn resolve_entries(
        &self,
        ctx: &CallContext,
        entries: Vec<IndexEntry>,
        out: &mut Vec<Record>,
    ) -> BrokerResult<()> {
        for entry in entries {
            match self.read(ctx, &entry.record.id).await {
                Ok(Some(record)) if record.version == entry.version => out.push(record),
                Ok(_) => {
                    tracing::trace!(key = %entry.key, "skipping stale index entry");
                }
                Err(BrokerError::Corrupt { key, source }) => {
                    tracing::warn!(
                        record_type = %self.record_type(),
                        key = %key,
                        error = %source,
                        "skipping corrupt record"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
