//! Items: Tagged Values with Expiration
//!
//! An [`Item`] is the unit every backend stores: one [`Value`] of a fixed
//! type plus an optional absolute expiration instant. Accessors match on the
//! tag and report [`StorageError::TypeMismatch`] instead of inspecting types
//! at runtime.
//!
//! Expiration instants are wall-clock UTC so that the durable backend can
//! persist them across restarts.

use crate::storage::error::{Result, StorageError, ValueKind};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};

/// A hash value: field name to field value.
pub type Hash = HashMap<String, String>;

/// A list value, double-ended for O(1) push/pop on both ends.
pub type List = VecDeque<String>;

/// The data held by an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Hash(Hash),
    List(List),
}

impl Value {
    /// Returns the type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Hash(_) => ValueKind::Hash,
            Value::List(_) => ValueKind::List,
        }
    }
}

/// A stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The actual value stored
    pub value: Value,
    /// When this item expires (None = never expires)
    pub expire_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Creates an item that expires `ttl` seconds from now (0 = never).
    pub fn new(value: Value, ttl: u64) -> Self {
        Self {
            value,
            expire_at: expire_time(ttl, Utc::now()),
        }
    }

    /// Creates an item with an explicit expiration instant.
    pub fn with_expire_at(value: Value, expire_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expire_at }
    }

    /// Checks whether this item is alive at `now`.
    #[inline]
    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.map(|exp| exp > now).unwrap_or(true)
    }

    /// Checks whether this item is alive right now.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Utc::now())
    }

    /// Resets the expiration to `ttl` seconds from now (0 = never).
    pub fn set_ttl(&mut self, ttl: u64) {
        self.expire_at = expire_time(ttl, Utc::now());
    }

    pub fn as_string(&self) -> Result<&str> {
        match &self.value {
            Value::String(s) => Ok(s),
            _ => Err(StorageError::TypeMismatch(ValueKind::String)),
        }
    }

    pub fn as_hash(&self) -> Result<&Hash> {
        match &self.value {
            Value::Hash(h) => Ok(h),
            _ => Err(StorageError::TypeMismatch(ValueKind::Hash)),
        }
    }

    pub fn as_hash_mut(&mut self) -> Result<&mut Hash> {
        match &mut self.value {
            Value::Hash(h) => Ok(h),
            _ => Err(StorageError::TypeMismatch(ValueKind::Hash)),
        }
    }

    pub fn as_list(&self) -> Result<&List> {
        match &self.value {
            Value::List(l) => Ok(l),
            _ => Err(StorageError::TypeMismatch(ValueKind::List)),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut List> {
        match &mut self.value {
            Value::List(l) => Ok(l),
            _ => Err(StorageError::TypeMismatch(ValueKind::List)),
        }
    }

    /// Replaces the string held by this item, keeping its expiration.
    pub fn replace_string(&mut self, value: String) -> Result<()> {
        match &mut self.value {
            Value::String(s) => {
                *s = value;
                Ok(())
            }
            _ => Err(StorageError::TypeMismatch(ValueKind::String)),
        }
    }
}

/// Computes the expiration instant for a TTL in seconds.
///
/// A zero TTL, or one too large to represent, yields `None` (never expires).
pub fn expire_time(ttl: u64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ttl == 0 {
        return None;
    }
    let secs = i64::try_from(ttl).ok()?;
    let delta = TimeDelta::try_seconds(secs)?;
    now.checked_add_signed(delta)
}

/// Sorted field names of a hash.
pub fn sorted_fields(hash: &Hash) -> Vec<String> {
    let mut fields: Vec<String> = hash.keys().cloned().collect();
    fields.sort_unstable();
    fields
}

/// Elements of `list` in `[start, stop)`, both clamped to `[0, len]`.
pub fn list_range(list: &List, start: i64, stop: i64) -> Vec<String> {
    let len = list.len();
    let clamp = |i: i64| usize::try_from(i.max(0)).unwrap_or(usize::MAX).min(len);
    let (start, stop) = (clamp(start), clamp(stop));
    if start >= stop {
        return Vec::new();
    }
    list.range(start..stop).cloned().collect()
}
