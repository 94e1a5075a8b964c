//! Thread-Safe In-Memory Storage
//!
//! [`MemoryStorage`] keeps every item in one `HashMap` behind a single
//! `RwLock`. Reads take the shared lock, mutations the exclusive lock, which
//! makes each operation's check-then-mutate sequence atomic.
//!
//! ## Expiry
//!
//! 1. **Lazy**: every operation checks liveness first; an expired item is
//!    reported as missing and removed on the spot.
//! 2. **Active**: [`MemoryStorage::remove_expired`] drops every expired item,
//!    and is what the background [`ExpirySweeper`](crate::storage::ExpirySweeper)
//!    calls.

use crate::storage::error::{Result, StorageError};
use crate::storage::expiry::{Sweep, SweepStats};
use crate::storage::item::{self, Hash, Item, List, Value};
use crate::storage::Storage;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// A single lock-protected map of key to [`Item`].
///
/// # Example
///
/// ```
/// use jcache::storage::{MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new();
/// storage.list_create("queue", 0).unwrap();
/// storage.list_right_push("queue", "job-1").unwrap();
/// assert_eq!(storage.list_left_pop("queue").unwrap(), "job-1");
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Item>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored items, including expired items that have
    /// not been purged yet.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired item.
    ///
    /// # Returns
    ///
    /// Returns the number of items that were removed.
    pub fn remove_expired(&self) -> usize {
        let now = Utc::now();
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, item| item.is_alive_at(now));
        before - data.len()
    }

    /// Runs `f` on the live item under `key` while holding the read lock.
    fn read<R>(&self, key: &str, f: impl FnOnce(&Item) -> Result<R>) -> Result<R> {
        {
            let data = self.data.read();
            match data.get(key) {
                Some(item) if item.is_alive() => return f(item),
                Some(_) => {}
                None => return Err(StorageError::KeyNotExists),
            }
        }

        // Key exists but is expired - need write lock to remove it
        self.remove_if_expired(key);
        Err(StorageError::KeyNotExists)
    }

    /// Runs `f` on the live item under `key` while holding the write lock.
    fn modify<R>(&self, key: &str, f: impl FnOnce(&mut Item) -> Result<R>) -> Result<R> {
        let mut data = self.data.write();
        let now = Utc::now();

        match data.get(key).map(|item| item.is_alive_at(now)) {
            None => Err(StorageError::KeyNotExists),
            Some(false) => {
                data.remove(key);
                trace!(key, "Removed expired item");
                Err(StorageError::KeyNotExists)
            }
            Some(true) => {
                let item = data.get_mut(key).ok_or(StorageError::KeyNotExists)?;
                f(item)
            }
        }
    }

    /// Stores `item` under `key` unless a live item is already there.
    fn create(&self, key: &str, item: Item) -> Result<()> {
        let mut data = self.data.write();
        if data.get(key).is_some_and(Item::is_alive) {
            return Err(StorageError::KeyAlreadyExists);
        }
        data.insert(key.to_string(), item);
        Ok(())
    }

    fn remove_if_expired(&self, key: &str) {
        let mut data = self.data.write();
        // Race: another thread may have replaced the item in between
        if data.get(key).is_some_and(|item| !item.is_alive()) {
            data.remove(key);
            trace!(key, "Removed expired item");
        }
    }
}

impl Storage for MemoryStorage {
    fn keys(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let data = self.data.read();
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(_, item)| item.is_alive_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<()> {
        self.modify(key, |item| {
            item.set_ttl(ttl);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<String> {
        self.read(key, |item| item.as_string().map(str::to_string))
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.create(key, Item::new(Value::String(value.to_string()), ttl))
    }

    fn update(&self, key: &str, value: &str) -> Result<()> {
        self.modify(key, |item| item.replace_string(value.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write();
        match data.remove(key) {
            Some(item) if item.is_alive() => Ok(()),
            _ => Err(StorageError::KeyNotExists),
        }
    }

    fn hash_create(&self, key: &str, ttl: u64) -> Result<()> {
        self.create(key, Item::new(Value::Hash(Hash::new()), ttl))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<String> {
        self.read(key, |item| {
            item.as_hash()?
                .get(field)
                .cloned()
                .ok_or(StorageError::FieldNotExist)
        })
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.read(key, |item| {
            Ok(item
                .as_hash()?
                .iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect())
        })
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut data = self.data.write();
        let now = Utc::now();

        if !data.get(key).is_some_and(|item| item.is_alive_at(now)) {
            data.insert(key.to_string(), Item::new(Value::Hash(Hash::new()), 0));
        }

        let item = data.get_mut(key).ok_or(StorageError::KeyNotExists)?;
        item.as_hash_mut()?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.modify(key, |item| {
            item.as_hash_mut()?
                .remove(field)
                .map(|_| ())
                .ok_or(StorageError::FieldNotExist)
        })
    }

    fn hash_len(&self, key: &str) -> Result<usize> {
        self.read(key, |item| Ok(item.as_hash()?.len()))
    }

    fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        self.read(key, |item| Ok(item::sorted_fields(item.as_hash()?)))
    }

    fn list_create(&self, key: &str, ttl: u64) -> Result<()> {
        self.create(key, Item::new(Value::List(List::new()), ttl))
    }

    fn list_left_push(&self, key: &str, value: &str) -> Result<()> {
        self.modify(key, |item| {
            item.as_list_mut()?.push_front(value.to_string());
            Ok(())
        })
    }

    fn list_right_push(&self, key: &str, value: &str) -> Result<()> {
        self.modify(key, |item| {
            item.as_list_mut()?.push_back(value.to_string());
            Ok(())
        })
    }

    fn list_left_pop(&self, key: &str) -> Result<String> {
        self.modify(key, |item| {
            item.as_list_mut()?
                .pop_front()
                .ok_or(StorageError::ListEmpty)
        })
    }

    fn list_right_pop(&self, key: &str) -> Result<String> {
        self.modify(key, |item| {
            item.as_list_mut()?
                .pop_back()
                .ok_or(StorageError::ListEmpty)
        })
    }

    fn list_len(&self, key: &str) -> Result<usize> {
        self.read(key, |item| Ok(item.as_list()?.len()))
    }

    fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.read(key, |item| Ok(item::list_range(item.as_list()?, start, stop)))
    }
}

impl Sweep for MemoryStorage {
    fn purge_expired(&self) -> Result<SweepStats> {
        let scanned = self.len() as u64;
        let expired = self.remove_expired() as u64;
        Ok(SweepStats {
            scanned,
            expired,
            skipped: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ValueKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_set_and_get() {
        let storage = MemoryStorage::new();

        storage.set("key", "value", 0).unwrap();
        assert_eq!(storage.get("key").unwrap(), "value");
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get("nonexistent"),
            Err(StorageError::KeyNotExists)
        ));
    }

    #[test]
    fn test_set_existing_fails() {
        let storage = MemoryStorage::new();

        storage.set("key", "1", 0).unwrap();
        assert!(matches!(
            storage.set("key", "2", 0),
            Err(StorageError::KeyAlreadyExists)
        ));
        assert!(matches!(
            storage.hash_create("key", 0),
            Err(StorageError::KeyAlreadyExists)
        ));
        assert_eq!(storage.get("key").unwrap(), "1");
    }

    #[test]
    fn test_update_and_delete() {
        let storage = MemoryStorage::new();

        assert!(matches!(
            storage.update("key", "v"),
            Err(StorageError::KeyNotExists)
        ));

        storage.set("key", "1", 0).unwrap();
        storage.update("key", "2").unwrap();
        assert_eq!(storage.get("key").unwrap(), "2");

        storage.delete("key").unwrap();
        assert!(matches!(storage.get("key"), Err(StorageError::KeyNotExists)));
        assert!(matches!(
            storage.delete("key"),
            Err(StorageError::KeyNotExists)
        )); // Already deleted
    }

    #[test]
    fn test_update_rejects_non_string() {
        let storage = MemoryStorage::new();

        storage.hash_create("h", 0).unwrap();
        assert!(matches!(
            storage.update("h", "v"),
            Err(StorageError::TypeMismatch(ValueKind::String))
        ));
        assert_eq!(storage.hash_len("h").unwrap(), 0);
    }

    #[test]
    fn test_expiry() {
        let storage = MemoryStorage::new();

        storage.set("key", "value", 1).unwrap();
        storage.set("forever", "value", 0).unwrap();

        // Key should exist immediately
        assert_eq!(storage.get("key").unwrap(), "value");

        // Wait for expiry
        thread::sleep(Duration::from_millis(1100));

        // Key should be gone, and purged on access
        assert!(matches!(storage.get("key"), Err(StorageError::KeyNotExists)));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.keys().unwrap(), vec!["forever"]);

        // Expired key can be created again
        storage.set("key", "again", 0).unwrap();
        assert_eq!(storage.get("key").unwrap(), "again");
    }

    #[test]
    fn test_expire_changes_only_ttl() {
        let storage = MemoryStorage::new();

        assert!(matches!(
            storage.expire("missing", 10),
            Err(StorageError::KeyNotExists)
        ));

        storage.list_create("list", 0).unwrap();
        storage.list_right_push("list", "a").unwrap();

        storage.expire("list", 1).unwrap();
        assert_eq!(storage.list_range("list", 0, 10).unwrap(), vec!["a"]);

        storage.expire("list", 0).unwrap();
        thread::sleep(Duration::from_millis(1100));
        assert_eq!(storage.list_len("list").unwrap(), 1);
    }

    #[test]
    fn test_hash_operations() {
        let storage = MemoryStorage::new();

        storage.hash_create("h", 0).unwrap();
        storage.hash_set("h", "f2", "v2").unwrap();
        storage.hash_set("h", "f1", "v1").unwrap();

        assert_eq!(storage.hash_get("h", "f1").unwrap(), "v1");
        assert_eq!(storage.hash_len("h").unwrap(), 2);
        assert_eq!(storage.hash_keys("h").unwrap(), vec!["f1", "f2"]);

        let all = storage.hash_get_all("h").unwrap();
        assert_eq!(all.get("f1").map(String::as_str), Some("v1"));
        assert_eq!(all.get("f2").map(String::as_str), Some("v2"));

        assert!(matches!(
            storage.hash_get("h", "missing"),
            Err(StorageError::FieldNotExist)
        ));
        assert!(matches!(
            storage.hash_delete("h", "missing"),
            Err(StorageError::FieldNotExist)
        ));

        storage.hash_delete("h", "f1").unwrap();
        assert!(!storage.hash_get_all("h").unwrap().contains_key("f1"));
    }

    #[test]
    fn test_hash_set_creates_hash() {
        let storage = MemoryStorage::new();

        storage.hash_set("h", "f", "v").unwrap();
        assert_eq!(storage.hash_get("h", "f").unwrap(), "v");

        storage.set("s", "v", 0).unwrap();
        assert!(matches!(
            storage.hash_set("s", "f", "v"),
            Err(StorageError::TypeMismatch(ValueKind::Hash))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let storage = MemoryStorage::new();

        storage.set("s", "v", 0).unwrap();
        storage.list_create("l", 0).unwrap();

        assert!(matches!(
            storage.hash_get("s", "f"),
            Err(StorageError::TypeMismatch(ValueKind::Hash))
        ));
        assert!(matches!(
            storage.list_len("s"),
            Err(StorageError::TypeMismatch(ValueKind::List))
        ));
        assert!(matches!(
            storage.get("l"),
            Err(StorageError::TypeMismatch(ValueKind::String))
        ));
    }

    #[test]
    fn test_list_operations() {
        let storage = MemoryStorage::new();

        assert!(matches!(
            storage.list_right_push("l", "a"),
            Err(StorageError::KeyNotExists)
        ));

        storage.list_create("l", 0).unwrap();
        storage.list_right_push("l", "a").unwrap();
        storage.list_right_push("l", "b").unwrap();
        storage.list_left_push("l", "z").unwrap();

        assert_eq!(storage.list_len("l").unwrap(), 3);
        assert_eq!(storage.list_range("l", 0, 10).unwrap(), vec!["z", "a", "b"]);
        assert_eq!(storage.list_range("l", 1, 2).unwrap(), vec!["a"]);

        assert_eq!(storage.list_left_pop("l").unwrap(), "z");
        assert_eq!(storage.list_right_pop("l").unwrap(), "b");
        assert_eq!(storage.list_left_pop("l").unwrap(), "a");

        // Empty lists stay around
        assert!(matches!(
            storage.list_left_pop("l"),
            Err(StorageError::ListEmpty)
        ));
        assert!(matches!(
            storage.list_right_pop("l"),
            Err(StorageError::ListEmpty)
        ));
        assert_eq!(storage.list_len("l").unwrap(), 0);
    }

    #[test]
    fn test_keys_sorted() {
        let storage = MemoryStorage::new();

        storage.set("b", "1", 0).unwrap();
        storage.hash_create("c", 0).unwrap();
        storage.list_create("a", 0).unwrap();

        assert_eq!(storage.keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_expired() {
        let storage = MemoryStorage::new();

        storage.set("key1", "value1", 1).unwrap();
        storage.hash_create("key2", 1).unwrap();
        storage.set("key3", "value3", 0).unwrap(); // No expiry

        thread::sleep(Duration::from_millis(1100));

        assert_eq!(storage.len(), 3);
        assert_eq!(storage.remove_expired(), 2);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get("key3").unwrap(), "value3");
    }

    #[test]
    fn test_concurrent_access() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handles = vec![];

        // Spawn multiple writers
        for i in 0..10 {
            let storage = Arc::clone(&storage);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    storage.set(&key, "value", 0).unwrap();
                    storage.get(&key).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.keys().unwrap().len(), 1000);
    }

    #[test]
    fn test_concurrent_push_is_atomic() {
        let storage = Arc::new(MemoryStorage::new());
        storage.list_create("l", 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for _ in 0..250 {
                        storage.list_right_push("l", "x").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.list_len("l").unwrap(), 2000);
    }
}
