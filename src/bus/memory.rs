//! In-memory reference [`MessageBus`].
//!
//! A subscriber registry keyed by tag, grounded in a common
//! `PubSubInvalidator`/`TagInvalidator` (`examples/harborgrid-justin-caddy/
//! src/enterprise/cache/invalidation.rs`), which hold `broadcast::Sender`s
//! per topic. This reference bus dispatches directly to per-subscriber
//! closures instead of a broadcast channel so each subscription can decode
//! to its own concrete type.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::error::{CoreError, CoreResult};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Subscriber {
    token: CancellationToken,
    handler: Arc<dyn Fn(Vec<u8>) -> BoxFuture + Send + Sync>,
}

/// In-process topic-fanout pub/sub.
#[derive(Default)]
pub struct InMemoryMessageBus {
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl InMemoryMessageBus {
    /// Construct an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of live (non-cancelled) subscriptions for a tag.
    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.subscribers
            .get(tag)
            .map(|v| v.iter().filter(|s| !s.token.is_cancelled()).count())
            .unwrap_or(0)
    }

    fn dispatch(subscribers: &Arc<DashMap<String, Vec<Subscriber>>>, tag: &str, bytes: Vec<u8>) {
        if let Some(mut entry) = subscribers.get_mut(tag) {
            entry.retain(|s| !s.token.is_cancelled());
            for sub in entry.iter() {
                let fut = (sub.handler)(bytes.clone());
                tokio::spawn(fut);
            }
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish<T: Serialize + Send + Sync + 'static>(
        &self,
        tag: &str,
        message: T,
        delay: Option<Duration>,
    ) -> CoreResult<()> {
        let bytes =
            serde_json::to_vec(&message).map_err(|e| CoreError::serialization(e.to_string()))?;
        let subscribers = self.subscribers.clone();
        let tag = tag.to_string();
        match delay {
            None => {
                Self::dispatch(&subscribers, &tag, bytes);
            }
            Some(d) if d.is_zero() => {
                Self::dispatch(&subscribers, &tag, bytes);
            }
            Some(d) => {
                tokio::spawn(async move {
                    tokio::time::sleep(d).await;
                    Self::dispatch(&subscribers, &tag, bytes);
                });
            }
        }
        Ok(())
    }

    async fn subscribe<T, F, Fut>(&self, tag: &str, handler: F) -> CoreResult<CancellationToken>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handler = Arc::new(handler);
        let boxed: Arc<dyn Fn(Vec<u8>) -> BoxFuture + Send + Sync> = Arc::new(move |bytes| {
            let handler = handler.clone();
            Box::pin(async move {
                if let Ok(msg) = serde_json::from_slice::<T>(&bytes) {
                    handler(msg).await;
                }
            }) as BoxFuture
        });
        self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(tag.to_string())
            .or_default()
            .push(Subscriber {
                token: token.clone(),
                handler: boxed,
            });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = InMemoryMessageBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let r = received.clone();
        bus.subscribe::<i32, _, _>("nums", move |v| {
            let r = r.clone();
            async move {
                r.fetch_add(v as usize, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();
        bus.publish("nums", 7, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(received.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivery() {
        let bus = InMemoryMessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let token = bus
            .subscribe::<i32, _, _>("nums", move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();
        token.cancel();
        bus.publish("nums", 1, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delayed_publish_reaches_late_joiners() {
        let bus = InMemoryMessageBus::new();
        bus.publish("nums", 5, Some(Duration::from_millis(60)))
            .await
            .unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe::<i32, _, _>("nums", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
