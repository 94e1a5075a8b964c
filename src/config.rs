//! Backend Configuration
//!
//! [`StorageConfig`] describes which backend to run and how; [`Backend::open`]
//! turns it into a live store plus whatever background work that store
//! needs. In-memory kinds get an [`ExpirySweeper`] here; the durable store
//! owns its own.

use crate::storage::{
    DurableStorage, ExpiryConfig, ExpirySweeper, MemoryStorage, Result, ShardedStorage, Storage,
};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default database file for the durable backend.
pub const DEFAULT_STORAGE_PATH: &str = "jcache.redb";

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// One lock over one map
    #[default]
    Memory,
    /// N in-memory shards routed by CRC-32
    MultiMemory,
    /// redb database file
    Durable,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::MultiMemory => "multi_memory",
            StorageKind::Durable => "durable",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a storage type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown storage type '{0}' (expected memory, multi_memory or durable)")]
pub struct ParseStorageKindError(String);

impl FromStr for StorageKind {
    type Err = ParseStorageKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "multi_memory" => Ok(StorageKind::MultiMemory),
            "durable" => Ok(StorageKind::Durable),
            _ => Err(ParseStorageKindError(s.to_string())),
        }
    }
}

/// Settings for building a backend.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Which backend to build
    pub kind: StorageKind,
    /// Shard count for [`StorageKind::MultiMemory`]
    pub shard_count: usize,
    /// Database file for [`StorageKind::Durable`]
    pub path: PathBuf,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            shard_count: 1,
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A running backend: the store and its background sweeper.
pub struct Backend {
    kind: StorageKind,
    storage: Arc<dyn Storage>,
    sweeper: Option<ExpirySweeper>,
    durable: Option<Arc<DurableStorage>>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind).finish()
    }
}

impl Backend {
    /// Builds the backend described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let expiry = ExpiryConfig::with_interval(config.sweep_interval);

        let backend = match config.kind {
            StorageKind::Memory => {
                let storage = Arc::new(MemoryStorage::new());
                let sweeper = ExpirySweeper::start(storage.clone(), expiry)?;
                Self {
                    kind: config.kind,
                    storage,
                    sweeper: Some(sweeper),
                    durable: None,
                }
            }
            StorageKind::MultiMemory => {
                let storage = Arc::new(ShardedStorage::new(config.shard_count)?);
                let sweeper = ExpirySweeper::start(storage.clone(), expiry)?;
                info!(shards = config.shard_count, "Sharded storage initialized");
                Self {
                    kind: config.kind,
                    storage,
                    sweeper: Some(sweeper),
                    durable: None,
                }
            }
            StorageKind::Durable => {
                let storage = Arc::new(DurableStorage::open(&config.path, config.sweep_interval)?);
                Self {
                    kind: config.kind,
                    storage: storage.clone(),
                    sweeper: None,
                    durable: Some(storage),
                }
            }
        };

        info!(kind = %backend.kind, "Storage backend ready");
        Ok(backend)
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Returns a shared handle to the store.
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Stops background work and closes the durable store, if any.
    pub async fn shutdown(self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.shutdown().await;
        }
        if let Some(durable) = &self.durable {
            durable.close().await;
        }
        info!(kind = %self.kind, "Storage backend shut down");
    }
}
