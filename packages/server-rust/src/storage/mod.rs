//! Versioned record storage over a [`KvBackend`](crate::backend::KvBackend).
//!
//! - [`KeyLayout`]: where each namespace keeps its counter, records, and index
//! - [`VersionAllocator`]: monotonic versions from the shared counter
//! - [`ChangeNotifier`]: coalescing fan-out of change signals
//! - [`RecordStore`]: get/put/delete/list/clear-deleted/watch for one namespace
//! - [`RecordStoreFactory`]: one cached store per record type

pub mod allocator;
pub mod factory;
pub mod keys;
pub mod notifier;
pub mod record_store;

pub use allocator::VersionAllocator;
pub use factory::RecordStoreFactory;
pub use keys::KeyLayout;
pub use notifier::{ChangeNotifier, Watcher, WatcherId};
pub use record_store::{ListPage, PageCursor, RecordStore};
