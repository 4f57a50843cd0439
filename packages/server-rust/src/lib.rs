//! Databroker server: a versioned, change-notifying record store over a
//! remote key-value backend.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod storage;
pub mod worker;

pub use backend::{ChangeStream, InMemoryBackend, KvBackend};
pub use config::{BackendConfig, BrokerConfig, GcConfig, TlsConfig};
pub use context::CallContext;
pub use error::{BrokerError, BrokerResult};
pub use storage::{ListPage, PageCursor, RecordStore, RecordStoreFactory, Watcher};
pub use worker::{BackgroundRunnable, BackgroundWorker, GcRunnable, GcTask};
