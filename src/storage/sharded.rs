//! Sharded In-Memory Storage
//!
//! [`ShardedStorage`] spreads the keyspace over a fixed number of
//! independent [`MemoryStorage`] shards so that writers to different keys
//! contend on different locks.
//!
//! ## Routing
//!
//! ```text
//!   key ──► CRC-32/IEEE(key bytes) ──► mod N ──► shard index
//! ```
//!
//! The routing hash is CRC-32 with the IEEE 802.3 polynomial (the one used
//! by zlib and Ethernet), computed over the UTF-8 bytes of the key. It is a
//! pure function of the key and the shard count, so a key maps to the same
//! shard across calls, processes and releases.
//!
//! ## Consistency
//!
//! Per-key operations run entirely inside one shard and are linearizable.
//! [`Storage::keys`] visits the shards one after another without a global
//! lock, so under concurrent writers the result is not an atomic snapshot
//! of the whole keyspace.

use crate::storage::error::{Result, StorageError};
use crate::storage::expiry::{Sweep, SweepStats};
use crate::storage::memory::MemoryStorage;
use crate::storage::Storage;
use std::collections::BTreeMap;

/// Returns the shard that owns `key` among `shard_count` shards.
///
/// # Panics
///
/// Panics if `shard_count` is zero.
#[inline]
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    crc32fast::hash(key.as_bytes()) as usize % shard_count
}

/// A fixed array of in-memory shards presented as one store.
#[derive(Debug)]
pub struct ShardedStorage {
    shards: Vec<MemoryStorage>,
}

impl ShardedStorage {
    /// Creates a store with `shard_count` empty shards.
    ///
    /// Returns [`StorageError::InvalidConfig`] if `shard_count` is zero.
    pub fn new(shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(StorageError::InvalidConfig(
                "shard count must be at least 1".into(),
            ));
        }
        let shards = (0..shard_count).map(|_| MemoryStorage::new()).collect();
        Ok(Self { shards })
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn shard_of(&self, key: &str) -> usize {
        shard_index(key, self.shards.len())
    }

    /// Gets the shard for a given key.
    #[inline]
    fn shard(&self, key: &str) -> &MemoryStorage {
        &self.shards[self.shard_of(key)]
    }

    /// Returns the number of stored items across all shards, including
    /// expired items that have not been purged yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(MemoryStorage::len).sum()
    }

    /// Returns true if no shard holds anything.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(MemoryStorage::is_empty)
    }

    /// Removes every expired item, one shard at a time.
    pub fn remove_expired(&self) -> usize {
        self.shards.iter().map(MemoryStorage::remove_expired).sum()
    }
}

impl Storage for ShardedStorage {
    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.keys()?);
        }
        // Each shard's run is sorted and shards own disjoint keys
        keys.sort_unstable();
        Ok(keys)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<()> {
        self.shard(key).expire(key, ttl)
    }

    fn get(&self, key: &str) -> Result<String> {
        self.shard(key).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.shard(key).set(key, value, ttl)
    }

    fn update(&self, key: &str, value: &str) -> Result<()> {
        self.shard(key).update(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.shard(key).delete(key)
    }

    fn hash_create(&self, key: &str, ttl: u64) -> Result<()> {
        self.shard(key).hash_create(key, ttl)
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<String> {
        self.shard(key).hash_get(key, field)
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.shard(key).hash_get_all(key)
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.shard(key).hash_set(key, field, value)
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.shard(key).hash_delete(key, field)
    }

    fn hash_len(&self, key: &str) -> Result<usize> {
        self.shard(key).hash_len(key)
    }

    fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        self.shard(key).hash_keys(key)
    }

    fn list_create(&self, key: &str, ttl: u64) -> Result<()> {
        self.shard(key).list_create(key, ttl)
    }

    fn list_left_push(&self, key: &str, value: &str) -> Result<()> {
        self.shard(key).list_left_push(key, value)
    }

    fn list_right_push(&self, key: &str, value: &str) -> Result<()> {
        self.shard(key).list_right_push(key, value)
    }

    fn list_left_pop(&self, key: &str) -> Result<String> {
        self.shard(key).list_left_pop(key)
    }

    fn list_right_pop(&self, key: &str) -> Result<String> {
        self.shard(key).list_right_pop(key)
    }

    fn list_len(&self, key: &str) -> Result<usize> {
        self.shard(key).list_len(key)
    }

    fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.shard(key).list_range(key, start, stop)
    }
}

impl Sweep for ShardedStorage {
    fn purge_expired(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        for shard in &self.shards {
            stats += Sweep::purge_expired(shard)?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_zero_shards_rejected() {
        assert!(matches!(
            ShardedStorage::new(0),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_routing_hash_is_crc32_ieee() {
        // Standard CRC-32 check value
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
        assert_eq!(shard_index("123456789", 16), 0xCBF4_3926 % 16);
        assert_eq!(shard_index("anything", 1), 0);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let storage = ShardedStorage::new(8).unwrap();
        for i in 0..200 {
            let key = format!("key:{}", i);
            let first = storage.shard_of(&key);
            assert!(first < 8);
            for _ in 0..5 {
                assert_eq!(storage.shard_of(&key), first);
            }
            assert_eq!(first, shard_index(&key, 8));
        }
    }

    #[test]
    fn test_keys_spread_across_shards() {
        let storage = ShardedStorage::new(4).unwrap();
        for i in 0..100 {
            storage.set(&format!("key:{}", i), "v", 0).unwrap();
        }
        assert!(storage.shards.iter().all(|shard| !shard.is_empty()));
        assert_eq!(storage.len(), 100);
    }

    #[test]
    fn test_item_lives_in_owning_shard() {
        let storage = ShardedStorage::new(4).unwrap();
        storage.set("user:1", "Ariz", 0).unwrap();

        let owner = storage.shard_of("user:1");
        for (i, shard) in storage.shards.iter().enumerate() {
            assert_eq!(shard.get("user:1").is_ok(), i == owner);
        }
    }

    #[test]
    fn test_keys_merged_and_sorted() {
        let storage = ShardedStorage::new(3).unwrap();
        let mut expected = Vec::new();
        for i in (0..50).rev() {
            let key = format!("k{:02}", i);
            storage.set(&key, "v", 0).unwrap();
            expected.push(key);
        }
        expected.sort();
        assert_eq!(storage.keys().unwrap(), expected);
    }

    #[test]
    fn test_delegates_contract() {
        let storage = ShardedStorage::new(4).unwrap();

        storage.hash_create("h", 0).unwrap();
        storage.hash_set("h", "f1", "v1").unwrap();
        storage.list_create("l", 0).unwrap();
        storage.list_right_push("l", "a").unwrap();

        assert_eq!(storage.hash_get("h", "f1").unwrap(), "v1");
        assert_eq!(storage.list_left_pop("l").unwrap(), "a");
        assert!(matches!(
            storage.list_left_pop("l"),
            Err(StorageError::ListEmpty)
        ));
        assert!(matches!(
            storage.hash_create("h", 0),
            Err(StorageError::KeyAlreadyExists)
        ));
    }

    #[test]
    fn test_concurrent_writers_on_distinct_shards() {
        let storage = Arc::new(ShardedStorage::new(16).unwrap());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for j in 0..500 {
                        let key = format!("t{}:{}", t, j);
                        storage.set(&key, "v", 0).unwrap();
                        storage.update(&key, "w").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.keys().unwrap().len(), 4000);
        assert_eq!(storage.get("t3:42").unwrap(), "w");
    }
}
