//! Configuration types for the record store and its backend connection.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BrokerError, BrokerResult};

/// Top-level configuration for one record-type namespace.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Namespace discriminator. Partitions the version counter and keys so
    /// several record types can share one backend.
    pub record_type: String,
    /// Connection settings for the backing key-value store.
    pub backend: BackendConfig,
    /// Background garbage collection settings.
    pub gc: GcConfig,
    /// Index entries fetched per range scan by listing and GC.
    pub list_batch_size: usize,
}

impl BrokerConfig {
    /// Default configuration for `record_type`.
    #[must_use]
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            ..Self::default()
        }
    }

    /// Checks invariants the store relies on.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidConfig`] for an empty record type, a
    /// record type containing `/` (the key separator), a zero GC interval,
    /// a zero batch size, or incomplete TLS material.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.record_type.is_empty() {
            return Err(BrokerError::InvalidConfig(
                "record_type must not be empty".to_string(),
            ));
        }
        if self.record_type.contains('/') {
            return Err(BrokerError::InvalidConfig(format!(
                "record_type {:?} must not contain '/'",
                self.record_type
            )));
        }
        if self.gc.interval.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "gc interval must be positive".to_string(),
            ));
        }
        if self.list_batch_size == 0 {
            return Err(BrokerError::InvalidConfig(
                "list_batch_size must be positive".to_string(),
            ));
        }
        self.backend.validate()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            record_type: "default".to_string(),
            backend: BackendConfig::default(),
            gc: GcConfig::default(),
            list_batch_size: 256,
        }
    }
}

/// Connection settings for the backing store.
///
/// Consumed by [`KvBackend`](crate::backend::KvBackend) implementations that
/// talk to a remote store; the in-memory backend ignores it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Address of the backing store, e.g. `localhost:6379`.
    pub address: String,
    /// Optional username for authentication.
    pub username: Option<String>,
    /// Optional password for authentication.
    pub password: Option<String>,
    /// Optional TLS material. `None` means plaintext.
    pub tls: Option<TlsConfig>,
    /// Maximum time to wait when establishing a connection.
    pub connect_timeout: Duration,
}

impl BackendConfig {
    /// Whether connections to the backend use TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn validate(&self) -> BrokerResult<()> {
        if self.address.is_empty() {
            return Err(BrokerError::InvalidConfig(
                "backend address must not be empty".to_string(),
            ));
        }
        if self.password.is_some() && self.username.as_deref() == Some("") {
            return Err(BrokerError::InvalidConfig(
                "backend username must not be empty when set".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err(BrokerError::InvalidConfig(
                    "TLS requires both a certificate and a key path".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            username: None,
            password: None,
            tls: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// TLS certificate configuration for the backend connection.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the client certificate file.
    pub cert_path: PathBuf,
    /// Path to the client private key file.
    pub key_path: PathBuf,
    /// Optional CA bundle used to verify the backend's certificate.
    pub ca_cert_path: Option<PathBuf>,
}

/// Background garbage collection settings.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Interval between garbage collection passes.
    pub interval: Duration,
    /// How long tombstones are kept before they may be purged.
    pub retention: Duration,
    /// Maximum duration of a single pass.
    pub pass_timeout: Duration,
    /// Age after which an index entry whose write never landed is pruned.
    pub orphan_grace: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention: Duration::from_secs(3_600),
            pass_timeout: Duration::from_secs(30),
            orphan_grace: Duration::from_secs(300),
        }
    }
}
