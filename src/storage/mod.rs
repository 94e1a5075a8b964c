//! Storage Engine Module
//!
//! This module provides the storage backends for jcache. Every backend
//! implements the [`Storage`] trait, so the command dispatcher can run
//! against any of them unchanged.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────────────┐
//!                       │   dyn Storage        │
//!                       └──────────┬───────────┘
//!          ┌───────────────────────┼────────────────────────┐
//!          ▼                       ▼                        ▼
//! ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐
//! │  MemoryStorage  │   │   ShardedStorage     │   │ DurableStorage  │
//! │  RwLock<HashMap>│   │ ┌──────┐ ┌──────┐    │   │  redb + codec   │
//! │                 │   │ │Mem 0 │ │Mem N │... │   │                 │
//! └─────────────────┘   │ └──────┘ └──────┘    │   └────────┬────────┘
//!                       └──────────────────────┘            │
//!                                                           ▼
//!                                              ┌───────────────────────┐
//!                                              │     ExpirySweeper     │
//!                                              │ (Background Tokio Task)│
//!                                              └───────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Three value types**: strings, hashes and lists behind one keyspace
//! - **TTL Support**: Keys can have time-to-live expiry
//! - **Lazy Expiry**: Expired items are invisible on access and purged
//! - **Active Expiry**: A background sweeper reclaims forgotten items
//! - **Sharding**: CRC-32 routing over independent in-memory stores
//! - **Durability**: redb-backed store with a versioned record format
//!
//! ## Example
//!
//! ```
//! use jcache::storage::{MemoryStorage, Storage, StorageError};
//!
//! let storage = MemoryStorage::new();
//!
//! storage.set("name", "Ariz", 0).unwrap();
//! assert_eq!(storage.get("name").unwrap(), "Ariz");
//!
//! // Create operations never overwrite a live key
//! assert!(matches!(
//!     storage.set("name", "other", 0),
//!     Err(StorageError::KeyAlreadyExists)
//! ));
//! ```

pub mod durable;
pub mod error;
pub mod expiry;
pub mod item;
pub mod memory;
pub mod sharded;

use std::collections::BTreeMap;

// Re-export commonly used types
pub use durable::{BincodeCodec, CodecError, DurableStorage, ItemCodec};
pub use error::{Result, StorageError, ValueKind};
pub use expiry::{ExpiryConfig, ExpirySweeper, Sweep, SweepStats};
pub use item::{Item, Value};
pub use memory::MemoryStorage;
pub use sharded::{shard_index, ShardedStorage};

/// The operation set every backend implements identically.
///
/// TTLs are whole seconds; `0` means the item never expires. Every call is
/// atomic on its own; there are no multi-operation transactions.
pub trait Storage: Send + Sync {
    /// Returns all live keys, sorted.
    fn keys(&self) -> Result<Vec<String>>;

    /// Sets a new TTL on a live key of any type.
    fn expire(&self, key: &str, ttl: u64) -> Result<()>;

    /// Returns the value of a string key.
    fn get(&self, key: &str) -> Result<String>;

    /// Creates a string key. Fails if the key is live.
    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;

    /// Replaces the value of a live string key, keeping its TTL.
    fn update(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a live key of any type.
    fn delete(&self, key: &str) -> Result<()>;

    /// Creates an empty hash. Fails if the key is live.
    fn hash_create(&self, key: &str, ttl: u64) -> Result<()>;

    fn hash_get(&self, key: &str, field: &str) -> Result<String>;

    /// Returns every field of a hash, ordered by field name.
    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// Upserts a hash field. An absent key becomes a new hash without expiry.
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    fn hash_delete(&self, key: &str, field: &str) -> Result<()>;

    fn hash_len(&self, key: &str) -> Result<usize>;

    /// Returns the field names of a hash, sorted.
    fn hash_keys(&self, key: &str) -> Result<Vec<String>>;

    /// Creates an empty list. Fails if the key is live.
    fn list_create(&self, key: &str, ttl: u64) -> Result<()>;

    fn list_left_push(&self, key: &str, value: &str) -> Result<()>;

    fn list_right_push(&self, key: &str, value: &str) -> Result<()>;

    fn list_left_pop(&self, key: &str) -> Result<String>;

    fn list_right_pop(&self, key: &str) -> Result<String>;

    fn list_len(&self, key: &str) -> Result<usize>;

    /// Returns elements in `[start, stop)`, clamped to the list bounds.
    fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Returns true if calls may wait on disk I/O, so async callers should
    /// move them onto the blocking pool.
    fn is_blocking(&self) -> bool {
        false
    }
}
