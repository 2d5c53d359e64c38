//! Cache Client contract, value model, and scoping.
//!
//! This module defines the abstract `CacheClient` trait that every cache
//! provider (in-memory, or a real backend sitting outside this crate) must
//! satisfy, plus the key-scoping wrapper that composes over any client.
//!
//! The only reference implementation shipped here is [`memory::InMemoryCache`].

pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CoreResult;

/// A requested expiry.
///
/// Three states are needed, not two, because some operations (`increment`,
/// `set_if_higher`/`set_if_lower`) distinguish "caller didn't mention an
/// expiry" (preserve whatever is already stored) from "caller explicitly
/// asked for no expiry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// No expiry was specified by the caller; existing behavior applies
    /// (preserve an existing key's expiry, or create without one).
    #[default]
    Unspecified,
    /// Explicit "no expiry" (`TimeSpan.MaxValue` / absolute `MaxValue`).
    None,
    /// An absolute number of milliseconds from `now()`. Zero or negative
    /// means "already expired": the operation removes any existing entry
    /// and reports accordingly rather than creating one.
    Millis(i64),
}

impl Ttl {
    /// Build a `Ttl` from a relative [`Duration`] in the future.
    pub fn from_duration(d: Duration) -> Self {
        Ttl::Millis(d.as_millis() as i64)
    }

    /// `true` if this sentinel means "already expired" (non-positive millis).
    pub fn is_past(&self) -> bool {
        matches!(self, Ttl::Millis(m) if *m <= 0)
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::from_duration(d)
    }
}

/// Three-state cache read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue<T> {
    /// No entry exists for the key (or it has expired).
    Absent,
    /// The entry exists and its stored value is an explicit null.
    Null,
    /// The entry exists with a materialized value of type `T`.
    Present(T),
}

impl<T> CacheValue<T> {
    /// `true` for any non-absent outcome (`exists(k)` per invariant 1).
    pub fn exists(&self) -> bool {
        !matches!(self, CacheValue::Absent)
    }

    /// `true` only for `Present`.
    pub fn is_present(&self) -> bool {
        matches!(self, CacheValue::Present(_))
    }

    /// Collapse to `Option<T>`: `Present(v) -> Some(v)`, everything else `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheValue::Present(v) => Some(v),
            _ => None,
        }
    }
}

/// The keyed store contract: TTL, numeric counters, list
/// primitives, bulk operations, and atomic conditional operations.
///
/// All keys must be non-empty; violations fail with
/// [`CoreError::InvalidArgument`](crate::error::CoreError::InvalidArgument).
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Read a single key, decoding to `T`.
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> CoreResult<CacheValue<T>>;

    /// Read many keys at once; the result preserves every requested key,
    /// including duplicates, exactly as given.
    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        keys: &[String],
    ) -> CoreResult<HashMap<String, CacheValue<T>>>;

    /// Unconditional write. `Ttl::Millis(n)` with `n <= 0` removes any
    /// existing entry and returns `false`.
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool>;

    /// Succeeds only if `key` is currently absent. This is the atomic
    /// primitive the lock provider builds on.
    async fn add<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool>;

    /// Succeeds only if `key` currently exists.
    async fn replace<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool>;

    /// Compare-and-swap by value equality.
    async fn replace_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
        new: &T,
        expires: Ttl,
    ) -> CoreResult<bool>;

    /// Remove a key. Returns `false` if it didn't exist.
    async fn remove(&self, key: &str) -> CoreResult<bool>;

    /// Compare-and-delete by value equality.
    async fn remove_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
    ) -> CoreResult<bool>;

    /// Remove the listed keys, or every key when `keys` is `None`. Returns
    /// the count actually removed.
    async fn remove_all(&self, keys: Option<&[String]>) -> CoreResult<u64>;

    /// Remove entries whose key starts with `prefix`, byte-for-byte. An
    /// empty prefix removes every key in scope.
    async fn remove_by_prefix(&self, prefix: &str) -> CoreResult<u64>;

    /// Atomic signed 64-bit increment; initializes to `amount` if absent.
    async fn increment(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64>;

    /// Atomic `f64` increment, analogous to [`CacheClient::increment`].
    async fn increment_f64(&self, key: &str, amount: f64, expires: Ttl) -> CoreResult<f64>;

    /// Write only if `amount` is strictly greater than the stored value.
    /// Returns the applied difference, `0` if unchanged, or `-1` if the
    /// requested expiry was already past (entry removed).
    async fn set_if_higher(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64>;

    /// Write only if `amount` is strictly less than the stored value. Same
    /// return convention as [`CacheClient::set_if_higher`].
    async fn set_if_lower(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64>;

    /// Remaining lifetime of `key`, or `None` if absent or no expiry set.
    async fn get_expiration(&self, key: &str) -> CoreResult<Option<Duration>>;

    /// Bulk [`CacheClient::get_expiration`]; only keys that exist and carry
    /// an expiry appear in the result.
    async fn get_all_expiration(&self, keys: &[String]) -> CoreResult<HashMap<String, Duration>>;

    /// Set the expiry of an existing key. `Ttl::None` clears the expiry
    /// (keeps the value); `Ttl::Millis(n)` with `n <= 0` removes the key.
    async fn set_expiration(&self, key: &str, expires: Ttl) -> CoreResult<bool>;

    /// Per-key [`CacheClient::set_expiration`]; missing keys are ignored.
    async fn set_all_expiration(&self, expirations: &HashMap<String, Ttl>) -> CoreResult<()>;

    /// Insert distinct list members. Returns the number actually added
    /// (duplicates already present are not re-counted).
    async fn list_add(&self, key: &str, items: &[serde_json::Value], expires: Ttl)
        -> CoreResult<u64>;

    /// Remove list members. `expires` is accepted but ignored — matching
    /// the upstream behavior this crate is modeled on, not "fixed".
    async fn list_remove(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64>;

    /// Current members of a list, optionally 1-based paged.
    async fn get_list(
        &self,
        key: &str,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> CoreResult<CacheValue<Vec<serde_json::Value>>>;

    /// Store `when_ms` (epoch milliseconds) as a plain integer, so
    /// `set_if_higher`/`set_if_lower` can later operate monotonically on
    /// it the same way they do on any other counter — a `DateTime` is
    /// never a first-class stored type here, only its canonical epoch
    /// form is.
    async fn set_unix_time_ms(&self, key: &str, when_ms: i64, expires: Ttl) -> CoreResult<bool> {
        self.set(key, &when_ms, expires).await
    }

    /// Read back a value written by [`CacheClient::set_unix_time_ms`], as
    /// epoch milliseconds.
    async fn unix_time_ms(&self, key: &str) -> CoreResult<Option<i64>> {
        Ok(self.get::<i64>(key).await?.into_option())
    }

    /// [`CacheClient::set_unix_time_ms`], but in epoch seconds.
    async fn set_unix_time_sec(&self, key: &str, when_sec: i64, expires: Ttl) -> CoreResult<bool> {
        self.set_unix_time_ms(key, when_sec.saturating_mul(1000), expires)
            .await
    }

    /// [`CacheClient::unix_time_ms`], but in epoch seconds.
    async fn unix_time_sec(&self, key: &str) -> CoreResult<Option<i64>> {
        Ok(self.unix_time_ms(key).await?.map(|ms| ms.div_euclid(1000)))
    }

    /// Read-through convenience: return the cached value for `key` if
    /// present, otherwise compute it with `factory`, `add` it, and return
    /// what ends up cached. Two racing callers on a cold key may both run
    /// `factory`, but only one `add` wins — the loser discards its
    /// computed value and returns the winner's via a follow-up `get`.
    async fn get_or_add<T, F, Fut>(&self, key: &str, expires: Ttl, factory: F) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = T> + Send,
    {
        if let CacheValue::Present(value) = self.get::<T>(key).await? {
            return Ok(value);
        }
        let value = factory().await;
        if self.add(key, &value, expires).await? {
            return Ok(value);
        }
        match self.get::<T>(key).await? {
            CacheValue::Present(existing) => Ok(existing),
            _ => Ok(value),
        }
    }
}

/// A cache wrapper that transparently prefixes every key with
/// `scope + ':'`. Scoping composes: wrapping a scoped client in another
/// scope behaves exactly like one scope of the concatenated prefixes.
#[derive(Clone)]
pub struct ScopedCache<C> {
    inner: C,
    prefix: String,
}

impl<C> ScopedCache<C> {
    /// Wrap `inner`, prefixing all keys with `scope + ':'`.
    pub fn new(inner: C, scope: &str) -> Self {
        Self {
            inner,
            prefix: format!("{scope}:"),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl<C: CacheClient + Send + Sync> CacheClient for ScopedCache<C> {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> CoreResult<CacheValue<T>> {
        self.inner.get(&self.full_key(key)).await
    }

    async fn get_all<T: DeserializeOwned + Send>(
        &self,
        keys: &[String],
    ) -> CoreResult<HashMap<String, CacheValue<T>>> {
        let scoped: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let result = self.inner.get_all(&scoped).await?;
        Ok(keys
            .iter()
            .zip(scoped.iter())
            .filter_map(|(orig, full)| result.get(full).map(|v| (orig.clone(), v.clone())))
            .collect())
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        self.inner.set(&self.full_key(key), value, expires).await
    }

    async fn add<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        self.inner.add(&self.full_key(key), value, expires).await
    }

    async fn replace<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        self.inner
            .replace(&self.full_key(key), value, expires)
            .await
    }

    async fn replace_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
        new: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        self.inner
            .replace_if_equal(&self.full_key(key), expected, new, expires)
            .await
    }

    async fn remove(&self, key: &str) -> CoreResult<bool> {
        self.inner.remove(&self.full_key(key)).await
    }

    async fn remove_if_equal<T: Serialize + DeserializeOwned + PartialEq + Send + Sync>(
        &self,
        key: &str,
        expected: &T,
    ) -> CoreResult<bool> {
        self.inner
            .remove_if_equal(&self.full_key(key), expected)
            .await
    }

    async fn remove_all(&self, keys: Option<&[String]>) -> CoreResult<u64> {
        match keys {
            None => self.inner.remove_by_prefix(&self.prefix).await,
            Some(keys) => {
                let scoped: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
                self.inner.remove_all(Some(&scoped)).await
            }
        }
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CoreResult<u64> {
        self.inner
            .remove_by_prefix(&format!("{}{}", self.prefix, prefix))
            .await
    }

    async fn increment(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        self.inner
            .increment(&self.full_key(key), amount, expires)
            .await
    }

    async fn increment_f64(&self, key: &str, amount: f64, expires: Ttl) -> CoreResult<f64> {
        self.inner
            .increment_f64(&self.full_key(key), amount, expires)
            .await
    }

    async fn set_if_higher(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        self.inner
            .set_if_higher(&self.full_key(key), amount, expires)
            .await
    }

    async fn set_if_lower(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        self.inner
            .set_if_lower(&self.full_key(key), amount, expires)
            .await
    }

    async fn get_expiration(&self, key: &str) -> CoreResult<Option<Duration>> {
        self.inner.get_expiration(&self.full_key(key)).await
    }

    async fn get_all_expiration(&self, keys: &[String]) -> CoreResult<HashMap<String, Duration>> {
        let scoped: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let result = self.inner.get_all_expiration(&scoped).await?;
        Ok(keys
            .iter()
            .zip(scoped.iter())
            .filter_map(|(orig, full)| result.get(full).map(|d| (orig.clone(), *d)))
            .collect())
    }

    async fn set_expiration(&self, key: &str, expires: Ttl) -> CoreResult<bool> {
        self.inner
            .set_expiration(&self.full_key(key), expires)
            .await
    }

    async fn set_all_expiration(&self, expirations: &HashMap<String, Ttl>) -> CoreResult<()> {
        let scoped: HashMap<String, Ttl> = expirations
            .iter()
            .map(|(k, v)| (self.full_key(k), *v))
            .collect();
        self.inner.set_all_expiration(&scoped).await
    }

    async fn list_add(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64> {
        self.inner
            .list_add(&self.full_key(key), items, expires)
            .await
    }

    async fn list_remove(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64> {
        self.inner
            .list_remove(&self.full_key(key), items, expires)
            .await
    }

    async fn get_list(
        &self,
        key: &str,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> CoreResult<CacheValue<Vec<serde_json::Value>>> {
        self.inner
            .get_list(&self.full_key(key), page, page_size)
            .await
    }
}
