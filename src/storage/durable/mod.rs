//! Durable Storage on redb
//!
//! [`DurableStorage`] keeps items in a single table of an embedded redb
//! database file. redb is a transactional, ordered key-value engine with one
//! writer at a time and snapshot-isolated readers, so every contract call is
//! exactly one transaction:
//!
//! - read transaction for pure reads (`keys`, `get`, `hash_get`, ...)
//! - write transaction for everything else
//!
//! All calls are synchronous and write commits wait for an fsync, so
//! [`Storage::is_blocking`] returns true and the connection layer runs
//! durable commands on Tokio's blocking pool.
//!
//! Items are serialized with the [`ItemCodec`] chosen at open time
//! ([`BincodeCodec`] by default). Lists are not supported by this backend:
//! every list operation returns [`StorageError::NotSupported`].
//!
//! ## Expiry
//!
//! Reads treat expired items as missing. A background [`ExpirySweeper`]
//! deletes them from the file at the configured interval; see
//! [`DurableStorage::purge_expired`].

mod codec;

pub use codec::{BincodeCodec, CodecError, ItemCodec, FORMAT_VERSION};

use crate::storage::error::{Result, StorageError};
use crate::storage::expiry::{ExpiryConfig, ExpirySweeper, Sweep, SweepStats};
use crate::storage::item::{self, Hash, Item, Value};
use crate::storage::Storage;
use chrono::Utc;
use redb::{
    Database, ReadOnlyTable, ReadableTable, ReadableTableMetadata, Table, TableDefinition,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The one table holding every item, keyed by item key.
const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("default");

type ItemTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type ReadItemTable = ReadOnlyTable<&'static str, &'static [u8]>;

/// The database handle and codec, shared with the sweeper task.
struct Engine {
    db: Database,
    codec: Arc<dyn ItemCodec>,
}

impl Engine {
    /// Runs `f` inside one read transaction.
    fn read<R>(&self, f: impl FnOnce(&ReadItemTable) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_read().map_err(StorageError::engine)?;
        let table = txn.open_table(ITEMS).map_err(StorageError::engine)?;
        f(&table)
    }

    /// Runs `f` inside one write transaction, committing only if it succeeds.
    fn write<R>(&self, f: impl FnOnce(&mut ItemTable<'_>) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_write().map_err(StorageError::engine)?;
        let result = {
            let mut table = txn.open_table(ITEMS).map_err(StorageError::engine)?;
            f(&mut table)?
        };
        txn.commit().map_err(StorageError::engine)?;
        Ok(result)
    }

    /// Decodes the record under `key`, alive or not.
    fn load<T>(&self, table: &T, key: &str) -> Result<Option<Item>>
    where
        T: ReadableTable<&'static str, &'static [u8]>,
    {
        match table.get(key).map_err(StorageError::engine)? {
            Some(record) => Ok(Some(self.codec.decode(record.value())?)),
            None => Ok(None),
        }
    }

    /// Like [`Engine::load`], but an undecodable record counts as absent so
    /// that the key can be written over.
    fn load_replaceable<T>(&self, table: &T, key: &str) -> Result<Option<Item>>
    where
        T: ReadableTable<&'static str, &'static [u8]>,
    {
        match self.load(table, key) {
            Err(StorageError::Codec(e)) => {
                warn!(key, error = %e, "Overwriting undecodable record");
                Ok(None)
            }
            other => other,
        }
    }

    /// Decodes the record under `key`, failing unless it is alive.
    fn load_live<T>(&self, table: &T, key: &str) -> Result<Item>
    where
        T: ReadableTable<&'static str, &'static [u8]>,
    {
        match self.load(table, key)? {
            Some(item) if item.is_alive() => Ok(item),
            _ => Err(StorageError::KeyNotExists),
        }
    }

    fn store(&self, table: &mut ItemTable<'_>, key: &str, item: &Item) -> Result<()> {
        let record = self.codec.encode(item)?;
        table
            .insert(key, &record[..])
            .map_err(StorageError::engine)?;
        Ok(())
    }

    /// Stores `item` unless a live item already sits under `key`.
    fn create(&self, key: &str, item: Item) -> Result<()> {
        self.write(|table| {
            if self
                .load_replaceable(&*table, key)?
                .is_some_and(|existing| existing.is_alive())
            {
                return Err(StorageError::KeyAlreadyExists);
            }
            self.store(table, key, &item)
        })
    }

    /// Loads a live item, lets `f` change it and writes it back.
    fn modify<R>(&self, key: &str, f: impl FnOnce(&mut Item) -> Result<R>) -> Result<R> {
        self.write(|table| {
            let mut item = self.load_live(&*table, key)?;
            let result = f(&mut item)?;
            self.store(table, key, &item)?;
            Ok(result)
        })
    }

    /// Runs `f` on a live hash inside a read transaction.
    fn read_hash<R>(&self, key: &str, f: impl FnOnce(&Hash) -> Result<R>) -> Result<R> {
        self.read(|table| {
            let item = self.load_live(table, key)?;
            f(item.as_hash()?)
        })
    }

    fn record_count(&self) -> Result<usize> {
        self.read(|table| {
            let len = table.len().map_err(StorageError::engine)?;
            Ok(usize::try_from(len).unwrap_or(usize::MAX))
        })
    }
}

impl Sweep for Engine {
    /// Scans every record in one read transaction, then deletes the expired
    /// ones in one write transaction.
    ///
    /// A record that fails to decode is logged and skipped. Each candidate is
    /// checked again inside the write transaction, so a key recreated between
    /// the two transactions survives.
    fn purge_expired(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let candidates = self.read(|table| {
            let mut keys = Vec::new();
            for entry in table.iter().map_err(StorageError::engine)? {
                let (key, record) = entry.map_err(StorageError::engine)?;
                stats.scanned += 1;
                match self.codec.decode(record.value()) {
                    Ok(item) if !item.is_alive_at(now) => keys.push(key.value().to_string()),
                    Ok(_) => {}
                    Err(e) => {
                        stats.skipped += 1;
                        warn!(key = key.value(), error = %e, "Skipping undecodable record");
                    }
                }
            }
            Ok(keys)
        })?;

        if candidates.is_empty() {
            return Ok(stats);
        }

        stats.expired = self.write(|table| {
            let mut removed = 0;
            for key in &candidates {
                let still_expired = match self.load(&*table, key) {
                    Ok(Some(item)) => !item.is_alive(),
                    Ok(None) | Err(StorageError::Codec(_)) => false,
                    Err(e) => return Err(e),
                };
                if still_expired {
                    table
                        .remove(key.as_str())
                        .map_err(StorageError::engine)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })?;

        Ok(stats)
    }
}

/// Storage backed by a redb database file.
///
/// # Example
///
/// ```no_run
/// use jcache::storage::{DurableStorage, Storage};
/// use std::time::Duration;
///
/// # async fn run() -> jcache::storage::Result<()> {
/// let storage = DurableStorage::open("jcache.redb", Duration::from_secs(60))?;
/// storage.set("name", "Ariz", 0)?;
/// storage.close().await;
/// # Ok(())
/// # }
/// ```
pub struct DurableStorage {
    engine: Arc<Engine>,
    sweeper: ExpirySweeper,
    path: PathBuf,
}

impl fmt::Debug for DurableStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableStorage")
            .field("path", &self.path)
            .finish()
    }
}

impl DurableStorage {
    /// Opens (or creates) the database at `path` with the default codec and
    /// starts the expiry sweeper.
    ///
    /// Must be called from within a Tokio runtime, which hosts the sweeper.
    pub fn open(path: impl AsRef<Path>, sweep_interval: Duration) -> Result<Self> {
        Self::open_with_codec(path, sweep_interval, Arc::new(BincodeCodec))
    }

    /// Opens (or creates) the database at `path` using `codec` for every
    /// record.
    pub fn open_with_codec(
        path: impl AsRef<Path>,
        sweep_interval: Duration,
        codec: Arc<dyn ItemCodec>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if sweep_interval.is_zero() {
            return Err(StorageError::InvalidConfig(
                "sweep interval must be greater than zero".into(),
            ));
        }

        // Fail before touching the file if there is no runtime for the sweeper
        tokio::runtime::Handle::try_current()?;

        let db = Database::create(&path).map_err(StorageError::engine)?;
        let txn = db.begin_write().map_err(StorageError::engine)?;
        txn.open_table(ITEMS).map_err(StorageError::engine)?;
        txn.commit().map_err(StorageError::engine)?;

        let engine = Arc::new(Engine { db, codec });
        let sweeper = ExpirySweeper::start(
            engine.clone(),
            ExpiryConfig::with_interval(sweep_interval),
        )?;

        info!(path = %path.display(), "Durable storage opened");

        Ok(Self {
            engine,
            sweeper,
            path,
        })
    }

    /// Returns the path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of stored records, including expired records that
    /// have not been swept yet.
    pub fn len(&self) -> Result<usize> {
        self.engine.record_count()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Runs one sweep cycle immediately.
    pub fn purge_expired(&self) -> Result<SweepStats> {
        self.engine.purge_expired()
    }

    /// Stops the expiry sweeper and waits for it to finish.
    ///
    /// Afterwards this store holds the only handle to the database, which is
    /// closed when the store is dropped.
    pub async fn close(&self) {
        self.sweeper.shutdown().await;
        debug!(path = %self.path.display(), "Durable storage closed");
    }
}

impl Storage for DurableStorage {
    fn keys(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        self.engine.read(|table| {
            // The table iterates in key order
            let mut keys = Vec::new();
            for entry in table.iter().map_err(StorageError::engine)? {
                let (key, record) = entry.map_err(StorageError::engine)?;
                match self.engine.codec.decode(record.value()) {
                    Ok(item) if item.is_alive_at(now) => keys.push(key.value().to_string()),
                    Ok(_) => {}
                    Err(e) => warn!(key = key.value(), error = %e, "Skipping undecodable record"),
                }
            }
            Ok(keys)
        })
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<()> {
        self.engine.modify(key, |item| {
            item.set_ttl(ttl);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<String> {
        self.engine.read(|table| {
            let item = self.engine.load_live(table, key)?;
            item.as_string().map(str::to_string)
        })
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.engine
            .create(key, Item::new(Value::String(value.to_string()), ttl))
    }

    fn update(&self, key: &str, value: &str) -> Result<()> {
        self.engine
            .modify(key, |item| item.replace_string(value.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.engine.write(|table| {
            match self.engine.load(&*table, key) {
                Ok(Some(item)) if item.is_alive() => {}
                Ok(_) => return Err(StorageError::KeyNotExists),
                Err(StorageError::Codec(e)) => {
                    warn!(key, error = %e, "Deleting undecodable record");
                }
                Err(e) => return Err(e),
            }
            table.remove(key).map_err(StorageError::engine)?;
            Ok(())
        })
    }

    fn hash_create(&self, key: &str, ttl: u64) -> Result<()> {
        self.engine
            .create(key, Item::new(Value::Hash(Hash::new()), ttl))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<String> {
        self.engine.read_hash(key, |hash| {
            hash.get(field).cloned().ok_or(StorageError::FieldNotExist)
        })
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.engine.read_hash(key, |hash| {
            Ok(hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
        })
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.engine.write(|table| {
            let mut item = match self.engine.load_replaceable(&*table, key)? {
                Some(item) if item.is_alive() => item,
                _ => Item::new(Value::Hash(Hash::new()), 0),
            };
            item.as_hash_mut()?
                .insert(field.to_string(), value.to_string());
            self.engine.store(table, key, &item)
        })
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.engine.modify(key, |item| {
            item.as_hash_mut()?
                .remove(field)
                .map(|_| ())
                .ok_or(StorageError::FieldNotExist)
        })
    }

    fn hash_len(&self, key: &str) -> Result<usize> {
        self.engine.read_hash(key, |hash| Ok(hash.len()))
    }

    fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        self.engine
            .read_hash(key, |hash| Ok(item::sorted_fields(hash)))
    }

    fn list_create(&self, _key: &str, _ttl: u64) -> Result<()> {
        Err(StorageError::NotSupported)
    }

    fn list_left_push(&self, _key: &str, _value: &str) -> Result<()> {
        Err(StorageError::NotSupported)
    }

    fn list_right_push(&self, _key: &str, _value: &str) -> Result<()> {
        Err(StorageError::NotSupported)
    }

    fn list_left_pop(&self, _key: &str) -> Result<String> {
        Err(StorageError::NotSupported)
    }

    fn list_right_pop(&self, _key: &str) -> Result<String> {
        Err(StorageError::NotSupported)
    }

    fn list_len(&self, _key: &str) -> Result<usize> {
        Err(StorageError::NotSupported)
    }

    fn list_range(&self, _key: &str, _start: i64, _stop: i64) -> Result<Vec<String>> {
        Err(StorageError::NotSupported)
    }

    /// Every write commits with an fsync.
    fn is_blocking(&self) -> bool {
        true
    }
}
