//! In-memory reference implementation of [`CacheClient`].
//!
//! Storage is a single process-wide [`DashMap`], giving per-key locking
//! without a single coarse mutex — the same sharded-concurrency shape
//! `LruCache`/`MultiTierCache` use elsewhere in this codebase. Every
//! observable outcome is indistinguishable from a totally ordered execution
//! of operations because DashMap serializes access to each shard's bucket
//! and every mutating method here does its check-then-act under a single
//! `entry()` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::{CacheClient, CacheValue, Ttl};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::serializer::{JsonSerializer, Serializer};

#[derive(Clone)]
struct ListItem {
    value: serde_json::Value,
    expires_at: Option<i64>,
}

#[derive(Clone)]
enum Stored {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    List(HashMap<String, ListItem>),
}

struct Entry {
    value: Stored,
    expires_at: Option<i64>,
    #[allow(dead_code)]
    created_at: i64,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(e) if now >= e)
    }
}

/// Configuration for [`InMemoryCache`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InMemoryCacheConfig {
    /// If a decode to the requested type fails, return `CacheValue::Absent`
    /// instead of a `serialization` error ("try-get mode", ).
    pub try_get: bool,
    /// How often the background sweep reaps expired list items that
    /// haven't been touched by a read. Eviction-on-read always happens
    /// regardless of this interval; this only covers the optional
    /// background maintenance the spec allows for list per-item expiry.
    pub maintenance_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            try_get: false,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

/// Single process-wide in-memory [`CacheClient`].
pub struct InMemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    serializer: JsonSerializer,
    config: InMemoryCacheConfig,
    expired_tx: broadcast::Sender<String>,
    maintenance: Option<tokio::task::JoinHandle<()>>,
}

impl InMemoryCache {
    /// Construct a cache with default configuration and the system clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, InMemoryCacheConfig::default())
    }

    /// Construct a cache with explicit configuration.
    pub fn with_config(clock: Arc<dyn Clock>, config: InMemoryCacheConfig) -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let (expired_tx, _) = broadcast::channel(1024);
        let maintenance = {
            let entries = entries.clone();
            let clock = clock.clone();
            let expired_tx = expired_tx.clone();
            let interval = config.maintenance_interval;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let now = clock.now_millis();
                    let expired: Vec<String> = entries
                        .iter()
                        .filter(|e| e.is_expired(now))
                        .map(|e| e.key().clone())
                        .collect();
                    for key in expired {
                        entries.remove(&key);
                        log::debug!("reaped expired cache key: {key}");
                        let _ = expired_tx.send(key);
                    }
                }
            }))
        };
        Self {
            entries,
            clock,
            serializer: JsonSerializer::new(),
            config,
            expired_tx,
            maintenance,
        }
    }

    /// Subscribe to the "key expired" observable event.
    pub fn expired_keys(&self) -> broadcast::Receiver<String> {
        self.expired_tx.subscribe()
    }

    /// Number of live (non-expired) entries. Expired entries may linger
    /// briefly between the maintenance sweep and the next read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Look up `key`, evicting and reporting it if it has expired. Returns
    /// `None` for absent-or-expired.
    fn live(&self, key: &str) -> Option<Stored> {
        let now = self.now();
        match self.entries.entry(key.to_string()) {
            DashEntry::Occupied(o) if o.get().is_expired(now) => {
                o.remove();
                let _ = self.expired_tx.send(key.to_string());
                None
            }
            DashEntry::Occupied(o) => Some(o.get().value.clone()),
            DashEntry::Vacant(_) => None,
        }
    }

    fn resolve_expires_at(&self, expires: Ttl, existing: Option<i64>) -> Option<i64> {
        match expires {
            Ttl::Unspecified => existing,
            Ttl::None => None,
            Ttl::Millis(n) => Some(self.now() + n),
        }
    }

    fn decode_scalar<T: DeserializeOwned>(&self, stored: &Stored) -> CoreResult<Option<T>> {
        let decoded = match stored {
            Stored::Null => return Ok(None),
            Stored::Bytes(b) => self.serializer.decode::<T>(b),
            Stored::Int(i) => serde_json::to_value(i)
                .and_then(serde_json::from_value)
                .map_err(|e| CoreError::serialization(e.to_string())),
            Stored::Float(f) => serde_json::to_value(f)
                .and_then(serde_json::from_value)
                .map_err(|e| CoreError::serialization(e.to_string())),
            Stored::List(_) => {
                return Err(CoreError::type_mismatch(
                    "cannot read a list key as a scalar value",
                ))
            }
        };
        decoded.map(Some)
    }

    fn encode_scalar<T: Serialize>(&self, value: &T) -> CoreResult<Stored> {
        let bytes = self.serializer.encode(value)?;
        if bytes == b"null" {
            Ok(Stored::Null)
        } else {
            Ok(Stored::Bytes(bytes))
        }
    }

    /// Read a stored value as a 64-bit integer. `Stored::Int` is always
    /// eligible (it was itself established by a prior increment-family
    /// op); `Stored::Bytes` is eligible only when it parses cleanly as an
    /// integer, since a plain `set`/`add`/`replace` of a number produces
    /// untyped bytes rather than a canonical numeric tag. `Stored::Float`
    /// never coerces here — a key already typed as a float by
    /// `increment_f64` stays a float, per the "mixed-type increments on
    /// the same key is an error" rule.
    fn coerce_int(stored: &Stored) -> Option<i64> {
        match stored {
            Stored::Int(i) => Some(*i),
            Stored::Bytes(b) => serde_json::from_slice::<i64>(b).ok(),
            _ => None,
        }
    }

    /// Mirror of [`InMemoryCache::coerce_int`] for the float path.
    /// `Stored::Int` does not coerce here, for the same reason
    /// `Stored::Float` does not coerce into [`InMemoryCache::coerce_int`].
    fn coerce_float(stored: &Stored) -> Option<f64> {
        match stored {
            Stored::Float(f) => Some(*f),
            Stored::Bytes(b) => serde_json::from_slice::<f64>(b).ok(),
            _ => None,
        }
    }

    fn validate_key(key: &str) -> CoreResult<()> {
        if key.is_empty() {
            Err(CoreError::invalid_argument("key must not be empty"))
        } else {
            Ok(())
        }
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> CoreResult<CacheValue<T>> {
        Self::validate_key(key)?;
        let Some(stored) = self.live(key) else {
            return Ok(CacheValue::Absent);
        };
        match self.decode_scalar::<T>(&stored) {
            Ok(Some(v)) => Ok(CacheValue::Present(v)),
            Ok(None) => Ok(CacheValue::Null),
            Err(e) if self.config.try_get => {
                let _ = e;
                Ok(CacheValue::Absent)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        keys: &[String],
    ) -> CoreResult<HashMap<String, CacheValue<T>>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            out.insert(key.clone(), self.get::<T>(key).await?);
        }
        Ok(out)
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(false);
        }
        let stored = self.encode_scalar(value)?;
        let expires_at = self.resolve_expires_at(expires, None);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: stored,
                expires_at,
                created_at: self.now(),
            },
        );
        Ok(true)
    }

    async fn add<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(false);
        }
        if self.live(key).is_some() {
            return Ok(false);
        }
        let stored = self.encode_scalar(value)?;
        let expires_at = self.resolve_expires_at(expires, None);
        match self.entries.entry(key.to_string()) {
            DashEntry::Occupied(_) => Ok(false),
            DashEntry::Vacant(v) => {
                v.insert(Entry {
                    value: stored,
                    expires_at,
                    created_at: self.now(),
                });
                Ok(true)
            }
        }
    }

    async fn replace<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        Self::validate_key(key)?;
        let Some(existing) = self.live(key) else {
            return Ok(false);
        };
        let _ = existing;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(true);
        }
        let stored = self.encode_scalar(value)?;
        let expires_at = self.resolve_expires_at(expires, None);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: stored,
                expires_at,
                created_at: self.now(),
            },
        );
        Ok(true)
    }

    async fn replace_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
        new: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        Self::validate_key(key)?;
        let Some(stored) = self.live(key) else {
            return Ok(false);
        };
        let current: Option<T> = self.decode_scalar(&stored)?;
        if current.as_ref() != Some(expected) {
            return Ok(false);
        }
        self.replace(key, new, expires).await
    }

    async fn remove(&self, key: &str) -> CoreResult<bool> {
        Self::validate_key(key)?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
    ) -> CoreResult<bool> {
        Self::validate_key(key)?;
        let Some(stored) = self.live(key) else {
            return Ok(false);
        };
        let current: Option<T> = self.decode_scalar(&stored)?;
        if current.as_ref() != Some(expected) {
            return Ok(false);
        }
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_all(&self, keys: Option<&[String]>) -> CoreResult<u64> {
        match keys {
            None => {
                let count = self.entries.len() as u64;
                self.entries.clear();
                Ok(count)
            }
            Some(keys) => {
                for key in keys {
                    if key.is_empty() {
                        return Err(CoreError::invalid_argument(
                            "remove_all keys must not contain empty entries",
                        ));
                    }
                }
                let mut count = 0u64;
                for key in keys {
                    if self.entries.remove(key).is_some() {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CoreResult<u64> {
        let matches: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let count = matches.len() as u64;
        for key in matches {
            self.entries.remove(&key);
        }
        Ok(count)
    }

    async fn increment(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(0);
        }
        match self.entries.entry(key.to_string()) {
            DashEntry::Vacant(v) => {
                let expires_at = self.resolve_expires_at(expires, None);
                v.insert(Entry {
                    value: Stored::Int(amount),
                    expires_at,
                    created_at: self.now(),
                });
                Ok(amount)
            }
            DashEntry::Occupied(mut o) => {
                if o.get().is_expired(self.now()) {
                    let expires_at = self.resolve_expires_at(expires, None);
                    o.insert(Entry {
                        value: Stored::Int(amount),
                        expires_at,
                        created_at: self.now(),
                    });
                    return Ok(amount);
                }
                let Some(existing) = Self::coerce_int(&o.get().value) else {
                    return Err(CoreError::type_mismatch(
                        "increment on a non-integer cache value",
                    ));
                };
                let updated = existing + amount;
                let expires_at = self.resolve_expires_at(expires, o.get().expires_at);
                o.get_mut().value = Stored::Int(updated);
                o.get_mut().expires_at = expires_at;
                Ok(updated)
            }
        }
    }

    async fn increment_f64(&self, key: &str, amount: f64, expires: Ttl) -> CoreResult<f64> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(0.0);
        }
        match self.entries.entry(key.to_string()) {
            DashEntry::Vacant(v) => {
                let expires_at = self.resolve_expires_at(expires, None);
                v.insert(Entry {
                    value: Stored::Float(amount),
                    expires_at,
                    created_at: self.now(),
                });
                Ok(amount)
            }
            DashEntry::Occupied(mut o) => {
                if o.get().is_expired(self.now()) {
                    let expires_at = self.resolve_expires_at(expires, None);
                    o.insert(Entry {
                        value: Stored::Float(amount),
                        expires_at,
                        created_at: self.now(),
                    });
                    return Ok(amount);
                }
                let Some(existing) = Self::coerce_float(&o.get().value) else {
                    return Err(CoreError::type_mismatch(
                        "increment on a non-float cache value",
                    ));
                };
                let updated = existing + amount;
                let expires_at = self.resolve_expires_at(expires, o.get().expires_at);
                o.get_mut().value = Stored::Float(updated);
                o.get_mut().expires_at = expires_at;
                Ok(updated)
            }
        }
    }

    async fn set_if_higher(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(-1);
        }
        match self.entries.entry(key.to_string()) {
            DashEntry::Vacant(v) => {
                let expires_at = self.resolve_expires_at(expires, None);
                v.insert(Entry {
                    value: Stored::Int(amount),
                    expires_at,
                    created_at: self.now(),
                });
                Ok(amount)
            }
            DashEntry::Occupied(mut o) => {
                if o.get().is_expired(self.now()) {
                    let expires_at = self.resolve_expires_at(expires, None);
                    o.insert(Entry {
                        value: Stored::Int(amount),
                        expires_at,
                        created_at: self.now(),
                    });
                    return Ok(amount);
                }
                let Some(existing) = Self::coerce_int(&o.get().value) else {
                    return Err(CoreError::type_mismatch("set_if_higher on a non-integer"));
                };
                if amount > existing {
                    let diff = amount - existing;
                    let expires_at = self.resolve_expires_at(expires, o.get().expires_at);
                    o.get_mut().value = Stored::Int(amount);
                    o.get_mut().expires_at = expires_at;
                    Ok(diff)
                } else {
                    Ok(0)
                }
            }
        }
    }

    async fn set_if_lower(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        Self::validate_key(key)?;
        if expires.is_past() {
            self.entries.remove(key);
            return Ok(-1);
        }
        match self.entries.entry(key.to_string()) {
            DashEntry::Vacant(v) => {
                let expires_at = self.resolve_expires_at(expires, None);
                v.insert(Entry {
                    value: Stored::Int(amount),
                    expires_at,
                    created_at: self.now(),
                });
                Ok(amount)
            }
            DashEntry::Occupied(mut o) => {
                if o.get().is_expired(self.now()) {
                    let expires_at = self.resolve_expires_at(expires, None);
                    o.insert(Entry {
                        value: Stored::Int(amount),
                        expires_at,
                        created_at: self.now(),
                    });
                    return Ok(amount);
                }
                let Some(existing) = Self::coerce_int(&o.get().value) else {
                    return Err(CoreError::type_mismatch("set_if_lower on a non-integer"));
                };
                if amount < existing {
                    let diff = existing - amount;
                    let expires_at = self.resolve_expires_at(expires, o.get().expires_at);
                    o.get_mut().value = Stored::Int(amount);
                    o.get_mut().expires_at = expires_at;
                    Ok(diff)
                } else {
                    Ok(0)
                }
            }
        }
    }

    async fn get_expiration(&self, key: &str) -> CoreResult<Option<Duration>> {
        Self::validate_key(key)?;
        let now = self.now();
        Ok(self.entries.get(key).and_then(|e| {
            if e.is_expired(now) {
                None
            } else {
                e.expires_at.map(|at| Duration::from_millis((at - now).max(0) as u64))
            }
        }))
    }

    async fn get_all_expiration(&self, keys: &[String]) -> CoreResult<HashMap<String, Duration>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(d) = self.get_expiration(key).await? {
                out.insert(key.clone(), d);
            }
        }
        Ok(out)
    }

    async fn set_expiration(&self, key: &str, expires: Ttl) -> CoreResult<bool> {
        Self::validate_key(key)?;
        if expires.is_past() {
            return Ok(self.entries.remove(key).is_some());
        }
        match self.entries.get_mut(key) {
            Some(mut e) => {
                e.expires_at = self.resolve_expires_at(expires, e.expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_all_expiration(&self, expirations: &HashMap<String, Ttl>) -> CoreResult<()> {
        for (key, ttl) in expirations {
            self.set_expiration(key, *ttl).await?;
        }
        Ok(())
    }

    async fn list_add(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64> {
        Self::validate_key(key)?;
        if items.is_empty() {
            return Ok(0);
        }
        let now = self.now();
        let item_expires_at = match expires {
            Ttl::Unspecified | Ttl::None => None,
            Ttl::Millis(n) => Some(now + n),
        };
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Stored::List(HashMap::new()),
                expires_at: None,
                created_at: now,
            });
        let list = match &mut entry.value {
            Stored::List(l) => l,
            _ => return Err(CoreError::type_mismatch("list_add on a non-list key")),
        };
        let mut added = 0u64;
        for item in items {
            if item.is_null() {
                continue;
            }
            let canon = item.to_string();
            if !list.contains_key(&canon) {
                list.insert(
                    canon,
                    ListItem {
                        value: item.clone(),
                        expires_at: item_expires_at,
                    },
                );
                added += 1;
            }
        }
        Ok(added)
    }

    async fn list_remove(
        &self,
        key: &str,
        items: &[serde_json::Value],
        _expires: Ttl,
    ) -> CoreResult<u64> {
        Self::validate_key(key)?;
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let list = match &mut entry.value {
            Stored::List(l) => l,
            _ => return Err(CoreError::type_mismatch("list_remove on a non-list key")),
        };
        let mut removed = 0u64;
        for item in items {
            if list.remove(&item.to_string()).is_some() {
                removed += 1;
            }
        }
        let empty = list.is_empty();
        drop(entry);
        if empty {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    async fn get_list(
        &self,
        key: &str,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> CoreResult<CacheValue<Vec<serde_json::Value>>> {
        Self::validate_key(key)?;
        if let Some(0) = page_size {
            return Err(CoreError::invalid_argument("page_size must be positive"));
        }
        let now = self.now();
        let mut remove_entirely = false;
        let result = match self.entries.get_mut(key) {
            None => return Ok(CacheValue::Absent),
            Some(mut entry) => {
                let list = match &mut entry.value {
                    Stored::List(l) => l,
                    _ => return Err(CoreError::type_mismatch("get_list on a non-list key")),
                };
                let expired: Vec<String> = list
                    .iter()
                    .filter(|(_, v)| matches!(v.expires_at, Some(e) if now >= e))
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in &expired {
                    list.remove(k);
                }
                if list.is_empty() {
                    remove_entirely = true;
                    None
                } else {
                    let mut values: Vec<serde_json::Value> =
                        list.values().map(|v| v.value.clone()).collect();
                    values.sort_by_key(|v| v.to_string());
                    let page = page.unwrap_or(1).max(1);
                    let size = page_size.unwrap_or(values.len() as u64).max(1) as usize;
                    let start = ((page - 1) as usize) * size;
                    let page_values: Vec<serde_json::Value> = values
                        .into_iter()
                        .skip(start)
                        .take(size)
                        .collect();
                    Some(page_values)
                }
            }
        };
        if remove_entirely {
            self.entries.remove(key);
            return Ok(CacheValue::Absent);
        }
        Ok(CacheValue::Present(result.unwrap_or_default()))
    }
}
