//! Queue contract: a reliable work queue with lease/renew/complete/abandon,
//! retries, dead-lettering, and background worker dispatch.
//!
//! The only reference implementation shipped here is [`memory::InMemoryQueue`].

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;

/// Opaque handle identifying a queued entry, returned by `enqueue` and
/// accepted by `complete`/`abandon`/`renew_lock`.
///
/// A provider binding whose transport hands back a distinct lease
/// identifier on dequeue (the Azure Service Bus lock-token case the spec
/// calls out) would wrap that identifier here instead of reusing the
/// enqueue-time id; the in-memory reference has only one id space, so the
/// same id serves both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(pub(crate) Uuid);

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a queue entry sits in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEntryState {
    /// Waiting to be dequeued.
    Queued,
    /// Leased to a worker; the lease expires at `lease_expires_at`.
    Working,
    /// Terminal: the handler finished successfully.
    Completed,
    /// Terminal from the caller's perspective for this attempt; the queue
    /// re-enqueues it (if attempts remain) or dead-letters it.
    Abandoned,
    /// Terminal: attempts exhausted, no further dequeues will occur.
    DeadLettered,
}

/// A snapshot of one work item.
#[derive(Debug, Clone)]
pub struct QueueEntry<T> {
    /// Opaque handle for `complete`/`abandon`/`renew_lock`.
    pub id: QueueEntryId,
    /// The deserialized payload.
    pub data: T,
    /// When the item was enqueued, epoch milliseconds.
    pub enqueued_at: i64,
    /// How many times this item has been dequeued, including the current
    /// lease.
    pub dequeue_count: u32,
    /// When the current lease expires, if the entry is currently `Working`.
    pub lease_expires_at: Option<i64>,
    /// Current state.
    pub state: QueueEntryState,
}

/// Monotonic counters (from queue creation) plus point-in-time depths.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total successful `enqueue` calls.
    pub enqueued: u64,
    /// Total successful `dequeue` calls (a retried entry counts again).
    pub dequeued: u64,
    /// Total `complete` calls.
    pub completed: u64,
    /// Total `abandon` calls (explicit, by the caller or a handler).
    pub abandoned: u64,
    /// Total handler errors observed by `start_working`.
    pub errors: u64,
    /// Total server-initiated lease expirations.
    pub timeouts: u64,
    /// Entries currently waiting to be dequeued.
    pub queued_depth: u64,
    /// Entries currently leased to a worker.
    pub working_depth: u64,
    /// Entries that have exhausted their attempts.
    pub deadletter_depth: u64,
}

/// The Queue contract every provider (in-memory, or a real backend outside
/// this crate) must satisfy.
#[async_trait]
pub trait QueueClient<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Enqueue `data`. Returns `None` if an `enqueuing` hook vetoed the
    /// operation — in that case no counters are mutated.
    async fn enqueue(&self, data: T) -> CoreResult<Option<QueueEntryId>>;

    /// Lease the next queued entry, waiting up to `timeout` (or forever if
    /// `None`) for one to become available. Returns `None` on timeout, not
    /// an error — matching the "entry | absent" contract.
    async fn dequeue(&self, timeout: Option<std::time::Duration>) -> CoreResult<Option<QueueEntry<T>>>;

    /// Mark a leased entry as successfully handled. Fails with
    /// `invalid-state` if the entry is not currently `Working`.
    async fn complete(&self, id: QueueEntryId) -> CoreResult<()>;

    /// Abandon a leased entry: re-enqueues it if attempts remain, else
    /// dead-letters it. Fails with `invalid-state` if the entry is not
    /// currently `Working`.
    async fn abandon(&self, id: QueueEntryId) -> CoreResult<()>;

    /// Extend a leased entry's lease by `work_item_timeout` from now.
    async fn renew_lock(&self, id: QueueEntryId) -> CoreResult<()>;

    /// Snapshot the queue's counters and depths.
    async fn get_stats(&self) -> QueueStats;

    /// All entries currently sitting in the dead-letter set.
    async fn get_deadletter_items(&self) -> Vec<QueueEntry<T>>;

    /// Drop every stored entry. Cumulative counters are not reset.
    async fn delete_queue(&self) -> CoreResult<()>;
}
