//! Throttling Lock: a fixed-window rate limiter exposing the same
//! acquire/release shape as [`super::CacheLockProvider`], grounded in the
//! same fixed-window bucketing `SlidingWindowCounter` uses
//! (`enterprise::ratelimit::algorithm`), but built purely on the cache's
//! `increment` primitive rather than an in-process atomic counter, so it
//! works against any [`CacheClient`] provider.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{CacheClient, Ttl};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};

/// A throttle "lock" handle. Release is a no-op: the throttle never holds
/// an exclusive resource, only a counted admission.
#[derive(Debug, Clone)]
pub struct ThrottleHandle {
    name: String,
}

impl ThrottleHandle {
    /// The throttled resource's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `(max_hits, window)` rate limiter built on [`CacheClient::increment`].
pub struct ThrottlingLockProvider<C> {
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    max_hits: u64,
    window: Duration,
}

impl<C> ThrottlingLockProvider<C>
where
    C: CacheClient + Send + Sync + 'static,
{
    /// Construct a throttle allowing `max_hits` acquires per `window`.
    pub fn new(cache: Arc<C>, clock: Arc<dyn Clock>, max_hits: u64, window: Duration) -> Self {
        Self {
            cache,
            clock,
            max_hits,
            window,
        }
    }

    fn bucket_key(&self, name: &str, window_index: i64) -> String {
        format!("warden.throttle.{name}:{window_index}")
    }

    fn window_index(&self, now_millis: i64) -> i64 {
        let window_millis = self.window.as_millis().max(1) as i64;
        now_millis.div_euclid(window_millis)
    }

    fn millis_until_next_window(&self, now_millis: i64) -> i64 {
        let window_millis = self.window.as_millis().max(1) as i64;
        let idx = self.window_index(now_millis);
        ((idx + 1) * window_millis) - now_millis
    }

    /// Attempt to acquire admission for `name`. Sleeps until the next
    /// window boundary and retries once if the current window is full;
    /// the overall wait is clipped by `acquire_timeout`.
    pub async fn acquire(
        &self,
        name: &str,
        acquire_timeout: Duration,
        cancel: CancellationToken,
    ) -> CoreResult<ThrottleHandle> {
        let deadline = self.clock.now_millis() + acquire_timeout.as_millis() as i64;
        loop {
            let now = self.clock.now_millis();
            let idx = self.window_index(now);
            let key = self.bucket_key(name, idx);
            let count = self
                .cache
                .increment(&key, 1, Ttl::from_duration(self.window))
                .await?;
            if count <= self.max_hits as i64 {
                return Ok(ThrottleHandle {
                    name: name.to_string(),
                });
            }

            if cancel.is_cancelled() {
                return Err(CoreError::cancelled(format!(
                    "throttle acquire for '{name}' cancelled"
                )));
            }

            let remaining = deadline - self.clock.now_millis();
            if remaining <= 0 {
                log::warn!("throttle '{name}' rejected acquire after {acquire_timeout:?}, bucket at {count}/{}", self.max_hits);
                return Err(CoreError::timeout(format!(
                    "throttle acquire for '{name}' timed out after {acquire_timeout:?}"
                )));
            }

            let wait_millis = self.millis_until_next_window(now).max(1);
            let wait = Duration::from_millis(wait_millis as u64).min(Duration::from_millis(remaining as u64));
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = cancel.cancelled() => {
                    return Err(CoreError::cancelled(format!(
                        "throttle acquire for '{name}' cancelled"
                    )));
                }
            }
        }
    }

    /// No-op: the throttle holds no exclusive resource to release.
    pub async fn release(&self, _handle: &ThrottleHandle) -> CoreResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::clock::SystemClock;

    fn provider(max_hits: u64, window: Duration) -> ThrottlingLockProvider<InMemoryCache> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        ThrottlingLockProvider::new(
            Arc::new(InMemoryCache::new(clock.clone())),
            clock,
            max_hits,
            window,
        )
    }

    #[tokio::test]
    async fn first_max_hits_succeed_immediately() {
        let p = provider(2, Duration::from_secs(1));
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn third_call_within_window_times_out_under_short_budget() {
        let p = provider(2, Duration::from_secs(1));
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        let err = p
            .acquire("r", Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn third_call_succeeds_after_window_rolls_over() {
        let p = provider(2, Duration::from_millis(150));
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        p.acquire("r", Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        let h = p
            .acquire("r", Duration::from_secs(2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(h.name(), "r");
    }
}
