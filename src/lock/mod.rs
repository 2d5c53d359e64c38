//! Cache Lock Provider: named distributed mutexes built purely on the
//! cache's `add` primitive plus message bus release notifications.

pub mod throttle;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::cache::{CacheClient, Ttl};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};

/// `(lock-name, holder-id-that-released)` published on release.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReleaseMessage {
    name: String,
    holder_id: Uuid,
}

/// A held lock. Dropping it does not release the lock — callers must
/// explicitly call [`CacheLockProvider::release`]; the lease is the
/// backstop against a holder that crashes before releasing.
#[derive(Debug, Clone)]
pub struct LockHandle {
    name: String,
    holder_id: Uuid,
}

impl LockHandle {
    /// The lock's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opaque holder identity stamp, required to release or renew.
    pub fn holder_id(&self) -> Uuid {
        self.holder_id
    }
}

fn lock_key(name: &str) -> String {
    format!("warden.lock.{name}")
}

fn release_topic(name: &str) -> String {
    format!("warden.lock.release.{name}")
}

/// Named distributed mutexes. Generic over any
/// [`CacheClient`] + [`MessageBus`] pair so the same protocol works
/// whether the cache/bus are in-memory or real providers.
pub struct CacheLockProvider<C, B> {
    cache: Arc<C>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
}

impl<C, B> CacheLockProvider<C, B>
where
    C: CacheClient + Send + Sync + 'static,
    B: MessageBus + Send + Sync + 'static,
{
    /// Construct a lock provider over the given cache and bus.
    pub fn new(cache: Arc<C>, bus: Arc<B>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, bus, clock }
    }

    /// Acquire the named lock.
    ///
    /// Repeatedly attempts `add(name, holder_id, lease)`; on failure, waits
    /// for either a release notification, `acquire_timeout` elapsing, or
    /// cancellation, then retries. Lease expiry is authoritative — the
    /// provider never fences a stale holder; a crashed holder's lock
    /// simply vanishes after `time_until_expires`.
    pub async fn acquire(
        &self,
        name: &str,
        time_until_expires: Duration,
        acquire_timeout: Duration,
        cancel: CancellationToken,
    ) -> CoreResult<LockHandle> {
        let holder_id = Uuid::new_v4();
        let key = lock_key(name);
        let deadline = self.clock.now_millis() + acquire_timeout.as_millis() as i64;

        let mut subscription = {
            let topic = release_topic(name);
            self.bus
                .subscribe::<ReleaseMessage, _, _>(&topic, |_msg: ReleaseMessage| async {})
                .await?
        };

        loop {
            if self
                .cache
                .add(&key, &holder_id, Ttl::from_duration(time_until_expires))
                .await?
            {
                subscription.cancel();
                log::debug!("lock '{name}' acquired by {holder_id}");
                return Ok(LockHandle {
                    name: name.to_string(),
                    holder_id,
                });
            }

            if cancel.is_cancelled() {
                subscription.cancel();
                return Err(CoreError::cancelled(format!(
                    "acquire of lock '{name}' cancelled"
                )));
            }

            let remaining = deadline - self.clock.now_millis();
            if remaining <= 0 {
                subscription.cancel();
                log::warn!("acquire of lock '{name}' timed out after {acquire_timeout:?}");
                return Err(CoreError::timeout(format!(
                    "acquire of lock '{name}' timed out after {acquire_timeout:?}"
                )));
            }

            // Poll rather than truly block on the release notification:
            // the in-memory bus dispatches onto spawned tasks rather than
            // a condition variable we can wait on directly here, so a
            // short sleep plays the role of "wake on release or timeout"
            // (spurious wakeups are explicitly tolerated by the spec).
            let wait = Duration::from_millis(10).min(Duration::from_millis(remaining.max(0) as u64));
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = cancel.cancelled() => {
                    subscription.cancel();
                    return Err(CoreError::cancelled(format!(
                        "acquire of lock '{name}' cancelled"
                    )));
                }
            }
        }
    }

    /// Release a lock, verifying the cache still holds it under our
    /// `holder_id` via compare-and-delete, then publishing a release
    /// notification so waiters retry promptly.
    pub async fn release(&self, handle: &LockHandle) -> CoreResult<bool> {
        let key = lock_key(&handle.name);
        let removed = self
            .cache
            .remove_if_equal(&key, &handle.holder_id)
            .await?;
        if removed {
            let topic = release_topic(&handle.name);
            self.bus
                .publish(
                    &topic,
                    ReleaseMessage {
                        name: handle.name.clone(),
                        holder_id: handle.holder_id,
                    },
                    None,
                )
                .await?;
            log::debug!("lock '{}' released by {}", handle.name, handle.holder_id);
        }
        Ok(removed)
    }

    /// Extend the lease atomically via compare-and-swap on holder identity.
    pub async fn renew(&self, handle: &LockHandle, new_lifetime: Duration) -> CoreResult<bool> {
        let key = lock_key(&handle.name);
        self.cache
            .replace_if_equal(
                &key,
                &handle.holder_id,
                &handle.holder_id,
                Ttl::from_duration(new_lifetime),
            )
            .await
    }

    /// Acquire, run `f`, then release once `f` returns. Does not attempt an
    /// unwind-safe release if `f` panics.
    pub async fn try_using<F, Fut, T>(
        &self,
        name: &str,
        time_until_expires: Duration,
        acquire_timeout: Duration,
        cancel: CancellationToken,
        f: F,
    ) -> CoreResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = T> + Send,
    {
        let handle = self
            .acquire(name, time_until_expires, acquire_timeout, cancel)
            .await?;
        let result = f().await;
        self.release(&handle).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryMessageBus;
    use crate::cache::memory::InMemoryCache;
    use crate::clock::SystemClock;

    fn provider() -> CacheLockProvider<InMemoryCache, InMemoryMessageBus> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        CacheLockProvider::new(
            Arc::new(InMemoryCache::new(clock.clone())),
            Arc::new(InMemoryMessageBus::new()),
            clock,
        )
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let provider = Arc::new(provider());
        let h1 = provider
            .acquire(
                "res",
                Duration::from_secs(10),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let p2 = provider.clone();
        let waiter = tokio::spawn(async move {
            p2.acquire(
                "res",
                Duration::from_secs(10),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        provider.release(&h1).await.unwrap();
        let h2 = waiter.await.unwrap().unwrap();
        assert_eq!(h2.name(), "res");
    }

    #[tokio::test]
    async fn acquire_times_out_when_held() {
        let provider = provider();
        let _h1 = provider
            .acquire(
                "busy",
                Duration::from_secs(10),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let err = provider
            .acquire(
                "busy",
                Duration::from_secs(10),
                Duration::from_millis(50),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn lease_expiry_allows_reacquisition_without_release() {
        let provider = provider();
        let _h1 = provider
            .acquire(
                "lease",
                Duration::from_millis(50),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let h2 = provider
            .acquire(
                "lease",
                Duration::from_secs(10),
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(h2.name(), "lease");
    }
}
