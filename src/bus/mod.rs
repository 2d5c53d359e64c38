//! Message Bus contract: topic-fanout pub/sub with delayed delivery.
//!
//! The only reference implementation shipped here is [`memory::InMemoryMessageBus`].

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;

/// `publish`/`subscribe` contract.
///
/// Messages are routed by a `contract-tag` — a type-identity token. A
/// subscription only receives messages published under the same tag it
/// subscribed to; this crate uses the Rust type name as that tag.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message, optionally delaying when it becomes deliverable.
    /// A `delay` of zero delivers immediately. Subscribers that join after
    /// publish but before the deliverable instant still receive it;
    /// subscribers that join afterward do not (the in-memory reference is
    /// not a persistent transport).
    async fn publish<T: Serialize + Send + Sync + 'static>(
        &self,
        tag: &str,
        message: T,
        delay: Option<Duration>,
    ) -> CoreResult<()>;

    /// Register a handler for messages published under `tag`. Returns a
    /// [`CancellationToken`] that, when cancelled, synchronously stops
    /// further dispatch to this subscription. In-flight handler
    /// invocations are not interrupted.
    async fn subscribe<T, F, Fut>(&self, tag: &str, handler: F) -> CoreResult<CancellationToken>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static;
}
