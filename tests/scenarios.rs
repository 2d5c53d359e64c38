// Integration tests exercising cross-module coordination scenarios.

#[cfg(test)]
mod scenarios {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use warden::bus::memory::InMemoryMessageBus;
    use warden::cache::memory::InMemoryCache;
    use warden::clock::SystemClock;
    use warden::hybrid::HybridCache;
    use warden::lock::throttle::ThrottlingLockProvider;
    use warden::{CacheClient, CacheValue, Clock, CoreError, ScopedCache, Ttl};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock::new())
    }

    #[tokio::test]
    async fn hybrid_invalidation_propagates_across_clients() {
        let remote = Arc::new(InMemoryCache::new(clock()));
        let bus = Arc::new(InMemoryMessageBus::new());

        let a = HybridCache::new("shared", remote.clone(), bus.clone(), clock())
            .await
            .unwrap();
        let b = HybridCache::new("shared", remote.clone(), bus.clone(), clock())
            .await
            .unwrap();

        a.set("x", &"v1".to_string(), Ttl::Unspecified).await.unwrap();
        let v: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(v, CacheValue::Present("v1".to_string()));
        assert_eq!(b.stats().local_hits, 0);

        a.set("x", &"v2".to_string(), Ttl::Unspecified).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(b.stats().invalidate_cache_calls, 1);

        let v2: CacheValue<String> = b.get("x").await.unwrap();
        assert_eq!(v2, CacheValue::Present("v2".to_string()));
    }

    #[tokio::test]
    async fn scoped_remove_by_prefix_does_not_touch_other_tenants() {
        let cache = Arc::new(InMemoryCache::new(clock()));
        cache.set("tenant-a:x", &1i32, Ttl::Unspecified).await.unwrap();
        cache.set("tenant-b:z", &9i32, Ttl::Unspecified).await.unwrap();

        let scoped_a = ScopedCache::new(cache.clone(), "tenant-a");
        scoped_a.set("y", &2i32, Ttl::Unspecified).await.unwrap();

        let removed = scoped_a.remove_by_prefix("").await.unwrap();
        assert_eq!(removed, 2);

        let untouched: CacheValue<i32> = cache.get("tenant-b:z").await.unwrap();
        assert_eq!(untouched, CacheValue::Present(9));

        let literal_star = scoped_a.remove_by_prefix("*").await.unwrap();
        assert_eq!(literal_star, 0);
    }

    #[tokio::test]
    async fn list_items_expire_and_are_reaped_on_access() {
        let cache = InMemoryCache::new(clock());
        cache
            .list_add("L", &[serde_json::json!(1)], Ttl::from_duration(Duration::from_millis(100)))
            .await
            .unwrap();

        let immediate = cache.get_list("L", None, None).await.unwrap();
        assert_eq!(immediate, CacheValue::Present(vec![serde_json::json!(1)]));

        tokio::time::sleep(Duration::from_millis(150)).await;

        let after: CacheValue<Vec<serde_json::Value>> = cache.get_list("L", None, None).await.unwrap();
        assert_eq!(after, CacheValue::Absent);
        let exists: CacheValue<Vec<serde_json::Value>> = cache.get_list("L", None, None).await.unwrap();
        assert!(!exists.exists());
    }

    #[tokio::test]
    async fn counter_with_past_expiry_is_removed_on_increment() {
        let cache = InMemoryCache::new(clock());
        cache.set("c", &100i64, Ttl::Unspecified).await.unwrap();

        let result = cache
            .increment("c", 5, Ttl::Millis(-1))
            .await
            .unwrap();
        assert_eq!(result, 0);

        let after: CacheValue<i64> = cache.get("c").await.unwrap();
        assert!(!after.exists());
    }

    #[tokio::test]
    async fn throttled_acquire_waits_for_next_window_then_succeeds() {
        let cache = Arc::new(InMemoryCache::new(clock()));
        let provider = ThrottlingLockProvider::new(cache, clock(), 2, Duration::from_millis(200));

        provider
            .acquire("shared-resource", Duration::from_millis(20), CancellationToken::new())
            .await
            .unwrap();
        provider
            .acquire("shared-resource", Duration::from_millis(20), CancellationToken::new())
            .await
            .unwrap();

        let third = provider
            .acquire("shared-resource", Duration::from_secs(2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.name(), "shared-resource");
    }

    #[tokio::test]
    async fn throttled_acquire_times_out_under_a_short_budget() {
        let cache = Arc::new(InMemoryCache::new(clock()));
        let provider = ThrottlingLockProvider::new(cache, clock(), 2, Duration::from_secs(1));

        provider
            .acquire("limited", Duration::from_millis(20), CancellationToken::new())
            .await
            .unwrap();
        provider
            .acquire("limited", Duration::from_millis(20), CancellationToken::new())
            .await
            .unwrap();

        let err = provider
            .acquire("limited", Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }
}
