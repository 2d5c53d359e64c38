//! Hybrid Cache: a local tier fronting a shared remote tier, kept coherent
//! by pub/sub invalidation.
//!
//! Hybrid owns both tiers outright — the local cache is created and
//! disposed by `HybridCache` itself, and the invalidation subscriber only
//! holds a `CancellationToken` back to the bus, never a strong reference
//! to Hybrid — avoiding the ownership cycle between the local tier and its
//! own invalidation subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::cache::memory::InMemoryCache;
use crate::cache::{CacheClient, CacheValue, Ttl};
use crate::clock::Clock;
use crate::error::CoreResult;

/// What an invalidation token targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InvalidationKind {
    /// A single key.
    Key,
    /// Every key sharing a prefix.
    Prefix,
    /// The entire local cache.
    All,
}

/// Wire shape published on the invalidation channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Stable for the lifetime of the originating `HybridCache` instance.
    pub origin_client_id: Uuid,
    /// What kind of invalidation this is.
    pub kind: InvalidationKind,
    /// Key or prefix; empty for `All`.
    pub payload: String,
}

/// Tuning knobs for [`HybridCache`].
#[derive(Debug, Clone)]
pub struct HybridCacheConfig {
    /// TTL applied to a value copied into the local tier when the remote
    /// entry has no expiry of its own.
    pub default_local_ttl: Duration,
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            default_local_ttl: Duration::from_secs(300),
        }
    }
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCacheStats {
    /// Reads satisfied entirely from the local tier.
    pub local_hits: u64,
    /// Invalidation messages received from other clients and applied.
    pub invalidate_cache_calls: u64,
}

/// Two-tier cache: process-local [`InMemoryCache`] over any remote
/// [`CacheClient`], coherent via a [`MessageBus`] invalidation channel.
pub struct HybridCache<R, B> {
    origin_id: Uuid,
    local: Arc<InMemoryCache>,
    remote: Arc<R>,
    bus: Arc<B>,
    topic: String,
    config: HybridCacheConfig,
    local_hits: Arc<AtomicU64>,
    invalidate_cache_calls: Arc<AtomicU64>,
    subscription: CancellationToken,
}

impl<R, B> HybridCache<R, B>
where
    R: CacheClient + Send + Sync + 'static,
    B: MessageBus + Send + Sync + 'static,
{
    /// Construct a hybrid cache sharing the invalidation topic `name` with
    /// every other hybrid instance on the same bus.
    pub async fn new(
        name: &str,
        remote: Arc<R>,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Self::with_config(name, remote, bus, clock, HybridCacheConfig::default()).await
    }

    /// Construct a hybrid cache with explicit configuration.
    pub async fn with_config(
        name: &str,
        remote: Arc<R>,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
        config: HybridCacheConfig,
    ) -> CoreResult<Self> {
        let origin_id = Uuid::new_v4();
        let local = Arc::new(InMemoryCache::new(clock));
        let topic = format!("warden.hybrid.invalidate.{name}");
        let invalidate_cache_calls = Arc::new(AtomicU64::new(0));

        let local_for_sub = local.clone();
        let counter_for_sub = invalidate_cache_calls.clone();
        let subscription = bus
            .subscribe::<InvalidationMessage, _, _>(&topic, move |msg: InvalidationMessage| {
                let local = local_for_sub.clone();
                let counter = counter_for_sub.clone();
                let origin_id = origin_id;
                async move {
                    if msg.origin_client_id == origin_id {
                        return;
                    }
                    match msg.kind {
                        InvalidationKind::Key => {
                            let _ = local.remove(&msg.payload).await;
                        }
                        InvalidationKind::Prefix => {
                            let _ = local.remove_by_prefix(&msg.payload).await;
                        }
                        InvalidationKind::All => {
                            let _ = local.remove_all(None).await;
                        }
                    }
                    log::debug!("invalidated local entry for {:?} from peer {}", msg.kind, msg.origin_client_id);
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await?;

        Ok(Self {
            origin_id,
            local,
            remote,
            bus,
            topic,
            config,
            local_hits: Arc::new(AtomicU64::new(0)),
            invalidate_cache_calls,
            subscription,
        })
    }

    /// Snapshot the observability counters.
    pub fn stats(&self) -> HybridCacheStats {
        HybridCacheStats {
            local_hits: self.local_hits.load(Ordering::SeqCst),
            invalidate_cache_calls: self.invalidate_cache_calls.load(Ordering::SeqCst),
        }
    }

    /// Stop receiving invalidations and release the local tier. The remote
    /// tier and bus outlive this call; only this instance's state is torn
    /// down.
    pub fn shutdown(&self) {
        self.subscription.cancel();
    }

    async fn invalidate(&self, kind: InvalidationKind, payload: &str) -> CoreResult<()> {
        self.bus
            .publish(
                &self.topic,
                InvalidationMessage {
                    origin_client_id: self.origin_id,
                    kind,
                    payload: payload.to_string(),
                },
                None,
            )
            .await
    }

    /// Read path: local first, then remote with optimistic
    /// local population, then absent.
    pub async fn get<T>(&self, key: &str) -> CoreResult<CacheValue<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let local_result = self.local.get::<T>(key).await?;
        if local_result.exists() {
            self.local_hits.fetch_add(1, Ordering::SeqCst);
            return Ok(local_result);
        }
        let remote_result = self.remote.get::<T>(key).await?;
        match &remote_result {
            CacheValue::Absent => {}
            CacheValue::Null => {
                self.local.set::<()>(key, &(), Ttl::None).await?;
            }
            CacheValue::Present(v) => {
                let ttl = match self.remote.get_expiration(key).await? {
                    Some(d) => Ttl::from_duration(d),
                    None => Ttl::from_duration(self.config.default_local_ttl),
                };
                self.local.set(key, v, ttl).await?;
            }
        }
        Ok(remote_result)
    }

    /// Write path: mutate remote, invalidate, then mirror
    /// locally. A remote failure never publishes an invalidation or
    /// touches local state.
    pub async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        let ok = self.remote.set(key, value, expires).await?;
        if ok {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.set(key, value, expires).await?;
        }
        Ok(ok)
    }

    /// Succeeds only if `key` currently exists at remote; on success the
    /// new value is known exactly, so local is mirrored optimistically
    /// the same way [`HybridCache::set`] mirrors it.
    pub async fn replace<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        expires: Ttl,
    ) -> CoreResult<bool> {
        let ok = self.remote.replace(key, value, expires).await?;
        if ok {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.set(key, value, expires).await?;
        }
        Ok(ok)
    }

    /// Compare-and-swap by value equality against remote. A CAS success
    /// does not hand back the stored value the way `set`/`replace` do, so
    /// local is removed rather than optimistically populated — the next
    /// `get` repopulates it from remote.
    pub async fn replace_if_equal<T>(
        &self,
        key: &str,
        expected: &T,
        new: &T,
        expires: Ttl,
    ) -> CoreResult<bool>
    where
        T: Serialize + DeserializeOwned + PartialEq + Send + Sync,
    {
        let ok = self.remote.replace_if_equal(key, expected, new, expires).await?;
        if ok {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(ok)
    }

    /// Remove a key, invalidating and mirroring locally on success.
    pub async fn remove(&self, key: &str) -> CoreResult<bool> {
        let ok = self.remote.remove(key).await?;
        if ok {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(ok)
    }

    /// Compare-and-delete by value equality against remote.
    pub async fn remove_if_equal<T>(&self, key: &str, expected: &T) -> CoreResult<bool>
    where
        T: Serialize + DeserializeOwned + PartialEq + Send + Sync,
    {
        let ok = self.remote.remove_if_equal(key, expected).await?;
        if ok {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(ok)
    }

    /// Remove every key sharing `prefix`, invalidating and mirroring
    /// locally on success.
    pub async fn remove_by_prefix(&self, prefix: &str) -> CoreResult<u64> {
        let count = self.remote.remove_by_prefix(prefix).await?;
        if count > 0 {
            self.invalidate(InvalidationKind::Prefix, prefix).await?;
            self.local.remove_by_prefix(prefix).await?;
        }
        Ok(count)
    }

    /// Remove the listed keys, or every key when `None`, invalidating and
    /// mirroring locally on success.
    pub async fn remove_all(&self, keys: Option<&[String]>) -> CoreResult<u64> {
        let count = self.remote.remove_all(keys).await?;
        if count > 0 {
            match keys {
                None => {
                    self.invalidate(InvalidationKind::All, "").await?;
                    self.local.remove_all(None).await?;
                }
                Some(keys) => {
                    for key in keys {
                        self.invalidate(InvalidationKind::Key, key).await?;
                    }
                    self.local.remove_all(Some(keys)).await?;
                }
            }
        }
        Ok(count)
    }

    /// Atomic increment against remote, invalidating and mirroring
    /// locally on success.
    pub async fn increment(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        let new_value = self.remote.increment(key, amount, expires).await?;
        self.invalidate(InvalidationKind::Key, key).await?;
        self.local.set(key, &new_value, expires).await?;
        Ok(new_value)
    }

    /// Write only if `amount` is strictly greater than the remote value.
    /// The applied difference is not the new value itself, so a real
    /// change (non-zero diff, including the `-1` past-expiry removal)
    /// invalidates and drops the local entry rather than mirroring it.
    pub async fn set_if_higher(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        let diff = self.remote.set_if_higher(key, amount, expires).await?;
        if diff != 0 {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(diff)
    }

    /// [`HybridCache::set_if_higher`], but for values strictly lower than
    /// the remote value.
    pub async fn set_if_lower(&self, key: &str, amount: i64, expires: Ttl) -> CoreResult<i64> {
        let diff = self.remote.set_if_lower(key, amount, expires).await?;
        if diff != 0 {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(diff)
    }

    /// Insert distinct list members at remote, invalidating and dropping
    /// the local entry on success (the resulting full list is not known
    /// without a round-trip, so the next `get_list` repopulates it).
    pub async fn list_add(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64> {
        let count = self.remote.list_add(key, items, expires).await?;
        if count > 0 {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(count)
    }

    /// Remove list members at remote, invalidating and dropping the local
    /// entry on success.
    pub async fn list_remove(
        &self,
        key: &str,
        items: &[serde_json::Value],
        expires: Ttl,
    ) -> CoreResult<u64> {
        let count = self.remote.list_remove(key, items, expires).await?;
        if count > 0 {
            self.invalidate(InvalidationKind::Key, key).await?;
            self.local.remove(key).await?;
        }
        Ok(count)
    }

    /// Read path for lists: local first, then remote. Only an unpaged read
    /// populates the local tier — caching one page as if it were the whole
    /// list would corrupt later unpaged reads.
    pub async fn get_list(
        &self,
        key: &str,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> CoreResult<CacheValue<Vec<serde_json::Value>>> {
        let local_result = self.local.get_list(key, page, page_size).await?;
        if local_result.exists() {
            self.local_hits.fetch_add(1, Ordering::SeqCst);
            return Ok(local_result);
        }
        let remote_result = self.remote.get_list(key, page, page_size).await?;
        if page.is_none() && page_size.is_none() {
            if let CacheValue::Present(items) = &remote_result {
                let ttl = match self.remote.get_expiration(key).await? {
                    Some(d) => Ttl::from_duration(d),
                    None => Ttl::from_duration(self.config.default_local_ttl),
                };
                self.local.list_add(key, items, ttl).await?;
            }
        }
        Ok(remote_result)
    }

    /// Remaining lifetime of `key` as seen by the remote tier.
    pub async fn get_expiration(&self, key: &str) -> CoreResult<Option<Duration>> {
        self.remote.get_expiration(key).await
    }

    /// Bulk read; delegates to remote for keys not locally cached (local
    /// tier is not specially batched — bulk operations need not be atomic
    /// as a group).
    pub async fn get_all<T>(&self, keys: &[String]) -> CoreResult<HashMap<String, CacheValue<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            out.insert(key.clone(), self.get::<T>(key).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryMessageBus;
    use crate::cache::memory::InMemoryCache;
    use crate::clock::SystemClock;

    async fn make_pair() -> (
        HybridCache<InMemoryCache, InMemoryMessageBus>,
        HybridCache<InMemoryCache, InMemoryMessageBus>,
    ) {
        let remote = Arc::new(InMemoryCache::new(Arc::new(SystemClock::new())));
        let bus = Arc::new(InMemoryMessageBus::new());
        let a = HybridCache::new("shared", remote.clone(), bus.clone(), Arc::new(SystemClock::new()))
            .await
            .unwrap();
        let b = HybridCache::new("shared", remote, bus, Arc::new(SystemClock::new()))
            .await
            .unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn read_through_populates_local_tier() {
        let (a, b) = make_pair().await;
        a.set("x", &"v1".to_string(), Ttl::Unspecified).await.unwrap();
        let first: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(first, CacheValue::Present("v1".to_string()));
        assert_eq!(b.stats().local_hits, 0);
        let second: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(second, CacheValue::Present("v1".to_string()));
        assert_eq!(b.stats().local_hits, 1);
    }

    #[tokio::test]
    async fn write_on_one_client_invalidates_the_others_local_copy() {
        let (a, b) = make_pair().await;
        a.set("x", &"v1".to_string(), Ttl::Unspecified).await.unwrap();
        let _: CacheValue<String> = b.get("x").await.unwrap();
        a.set("x", &"v2".to_string(), Ttl::Unspecified).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 1);
        let after: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(after, CacheValue::Present("v2".to_string()));
    }

    #[tokio::test]
    async fn replace_on_one_client_invalidates_the_others_local_copy() {
        let (a, b) = make_pair().await;
        a.set("x", &"v1".to_string(), Ttl::Unspecified).await.unwrap();
        let _: CacheValue<String> = b.get("x").await.unwrap();
        let replaced = a.replace("x", &"v2".to_string(), Ttl::Unspecified).await.unwrap();
        assert!(replaced);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 1);
        let after: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(after, CacheValue::Present("v2".to_string()));
    }

    #[tokio::test]
    async fn set_if_higher_on_one_client_invalidates_the_others_local_copy() {
        let (a, b) = make_pair().await;
        a.increment("n", 10, Ttl::Unspecified).await.unwrap();
        let _: CacheValue<i64> = b.get("n").await.unwrap();
        let diff = a.set_if_higher("n", 20, Ttl::Unspecified).await.unwrap();
        assert_eq!(diff, 10);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 1);
        let after: CacheValue<i64> = b.get("n").await.unwrap();
        assert_eq!(after, CacheValue::Present(20));
    }

    #[tokio::test]
    async fn set_if_higher_no_change_does_not_invalidate() {
        let (a, b) = make_pair().await;
        a.increment("n", 10, Ttl::Unspecified).await.unwrap();
        let diff = a.set_if_higher("n", 5, Ttl::Unspecified).await.unwrap();
        assert_eq!(diff, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 0);
    }

    #[tokio::test]
    async fn list_add_on_one_client_invalidates_the_others_local_copy() {
        let (a, b) = make_pair().await;
        a.list_add(
            "tags",
            &[serde_json::json!("rust")],
            Ttl::Unspecified,
        )
        .await
        .unwrap();
        let _: CacheValue<Vec<serde_json::Value>> = b.get_list("tags", None, None).await.unwrap();
        let added = a
            .list_add("tags", &[serde_json::json!("async")], Ttl::Unspecified)
            .await
            .unwrap();
        assert_eq!(added, 1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 1);
        let after: CacheValue<Vec<serde_json::Value>> =
            b.get_list("tags", None, None).await.unwrap();
        match after {
            CacheValue::Present(items) => assert_eq!(items.len(), 2),
            other => panic!("expected a present list, got {other:?}"),
        }
    }
}
