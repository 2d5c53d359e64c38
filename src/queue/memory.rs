//! In-memory reference [`QueueClient`].
//!
//! Grounded in the same shape as `scheduling::queue::JobQueue` and
//! `scheduling::worker::WorkerPool`
//! (`examples/harborgrid-justin-caddy/src/scheduling/{queue,worker}.rs`):
//! a primary map of entries guarded by a single async mutex, a notifier
//! that wakes blocked dequeues without busy-polling, and a background
//! sweeper that treats lapsed leases as system-initiated abandons.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::queue::{QueueClient, QueueEntry, QueueEntryId, QueueEntryState, QueueStats};

type BoxFuture<R> = Pin<Box<dyn Future<Output = R> + Send>>;
type EnqueuingHook<T> = Arc<dyn Fn(T) -> BoxFuture<(T, bool)> + Send + Sync>;
type EntryHook = Arc<dyn Fn(QueueEntryId) -> BoxFuture<()> + Send + Sync>;

/// Tuning knobs for [`InMemoryQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeued entry's lease lasts before the server treats it
    /// as abandoned.
    pub work_item_timeout: Duration,
    /// Maximum dequeue attempts before an abandoned entry is dead-lettered
    /// instead of re-enqueued.
    pub max_attempts: u32,
    /// How often the background sweeper checks for lapsed leases.
    pub lease_sweep_interval: Duration,
    /// Fraction of `work_item_timeout` a `start_working` handler may run
    /// before its lease is renewed on its behalf. `0.5` renews halfway
    /// through the lease; clamped to `[0.05, 0.95]`.
    pub renewal_threshold: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            work_item_timeout: Duration::from_secs(30),
            max_attempts: 3,
            lease_sweep_interval: Duration::from_millis(50),
            renewal_threshold: 0.5,
        }
    }
}

struct Internal<T> {
    data: T,
    enqueued_at: i64,
    dequeue_count: u32,
    lease_expires_at: Option<i64>,
    state: QueueEntryState,
}

impl<T: Clone> Internal<T> {
    fn snapshot(&self, id: QueueEntryId) -> QueueEntry<T> {
        QueueEntry {
            id,
            data: self.data.clone(),
            enqueued_at: self.enqueued_at,
            dequeue_count: self.dequeue_count,
            lease_expires_at: self.lease_expires_at,
            state: self.state,
        }
    }
}

struct State<T> {
    entries: HashMap<Uuid, Internal<T>>,
    queued: VecDeque<Uuid>,
    deadletter: Vec<Uuid>,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            queued: VecDeque::new(),
            deadletter: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

struct Hooks<T> {
    enqueuing: RwLock<Vec<EnqueuingHook<T>>>,
    enqueued: RwLock<Vec<EntryHook>>,
    dequeued: RwLock<Vec<EntryHook>>,
    lock_renewed: RwLock<Vec<EntryHook>>,
    completed: RwLock<Vec<EntryHook>>,
    abandoned: RwLock<Vec<EntryHook>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            enqueuing: RwLock::new(Vec::new()),
            enqueued: RwLock::new(Vec::new()),
            dequeued: RwLock::new(Vec::new()),
            lock_renewed: RwLock::new(Vec::new()),
            completed: RwLock::new(Vec::new()),
            abandoned: RwLock::new(Vec::new()),
        }
    }
}

/// Single process-wide in-memory [`QueueClient`].
pub struct InMemoryQueue<T> {
    state: Arc<Mutex<State<T>>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    counters: Arc<Counters>,
    hooks: Arc<Hooks<T>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
    sweeper_cancel: CancellationToken,
}

impl<T> InMemoryQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Construct a queue with default configuration and the system clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, QueueConfig::default())
    }

    /// Construct a queue with explicit configuration.
    pub fn with_config(clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        let state: Arc<Mutex<State<T>>> = Arc::new(Mutex::new(State::new()));
        let notify = Arc::new(Notify::new());
        let counters = Arc::new(Counters::default());
        let sweeper_cancel = CancellationToken::new();

        let sweeper = {
            let state = state.clone();
            let notify = notify.clone();
            let clock = clock.clone();
            let counters = counters.clone();
            let max_attempts = config.max_attempts;
            let interval = config.lease_sweep_interval;
            let cancel = sweeper_cancel.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let now = clock.now_millis();
                    let mut guard = state.lock().await;
                    let expired: Vec<Uuid> = guard
                        .entries
                        .iter()
                        .filter(|(_, e)| {
                            e.state == QueueEntryState::Working
                                && matches!(e.lease_expires_at, Some(at) if now >= at)
                        })
                        .map(|(id, _)| *id)
                        .collect();
                    let mut woke = false;
                    for id in expired {
                        counters.timeouts.fetch_add(1, Ordering::SeqCst);
                        let entry = guard.entries.get_mut(&id).expect("entry exists");
                        if entry.dequeue_count <= max_attempts {
                            entry.state = QueueEntryState::Queued;
                            entry.lease_expires_at = None;
                            guard.queued.push_back(id);
                            woke = true;
                            log::debug!("lease expired for entry {id}, requeued");
                        } else {
                            entry.state = QueueEntryState::DeadLettered;
                            guard.deadletter.push(id);
                            log::warn!("lease expired for entry {id}, dead-lettered after {} attempts", entry.dequeue_count);
                        }
                    }
                    drop(guard);
                    if woke {
                        notify.notify_waiters();
                    }
                }
            }))
        };

        Self {
            state,
            notify,
            clock,
            config,
            counters,
            hooks: Arc::new(Hooks::default()),
            sweeper,
            sweeper_cancel,
        }
    }

    /// Register a cancellable hook run before an enqueue takes effect. The
    /// handler returns `(data, cancel)`; `cancel = true` vetoes the
    /// enqueue and no counters are mutated.
    pub async fn on_enqueuing<F, Fut>(&self, hook: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (T, bool)> + Send + 'static,
    {
        self.hooks
            .enqueuing
            .write()
            .await
            .push(Arc::new(move |data| Box::pin(hook(data))));
    }

    /// Register a hook run after an enqueue, dequeue, lock renewal,
    /// completion, or abandon — awaited sequentially in registration order.
    pub async fn on_enqueued<F, Fut>(&self, hook: F)
    where
        F: Fn(QueueEntryId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .enqueued
            .write()
            .await
            .push(Arc::new(move |id| Box::pin(hook(id))));
    }

    /// See [`InMemoryQueue::on_enqueued`]; fired after a dequeue leases an
    /// entry.
    pub async fn on_dequeued<F, Fut>(&self, hook: F)
    where
        F: Fn(QueueEntryId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .dequeued
            .write()
            .await
            .push(Arc::new(move |id| Box::pin(hook(id))));
    }

    /// See [`InMemoryQueue::on_enqueued`]; fired after `renew_lock`.
    pub async fn on_lock_renewed<F, Fut>(&self, hook: F)
    where
        F: Fn(QueueEntryId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .lock_renewed
            .write()
            .await
            .push(Arc::new(move |id| Box::pin(hook(id))));
    }

    /// See [`InMemoryQueue::on_enqueued`]; fired after `complete`.
    pub async fn on_completed<F, Fut>(&self, hook: F)
    where
        F: Fn(QueueEntryId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .completed
            .write()
            .await
            .push(Arc::new(move |id| Box::pin(hook(id))));
    }

    /// See [`InMemoryQueue::on_enqueued`]; fired after `abandon`.
    pub async fn on_abandoned<F, Fut>(&self, hook: F)
    where
        F: Fn(QueueEntryId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .abandoned
            .write()
            .await
            .push(Arc::new(move |id| Box::pin(hook(id))));
    }

    async fn fire(hooks: &RwLock<Vec<EntryHook>>, id: QueueEntryId) {
        let snapshot = hooks.read().await.clone();
        for hook in snapshot {
            hook(id).await;
        }
    }

    async fn entry_state(&self, id: QueueEntryId) -> Option<QueueEntryState> {
        self.state.lock().await.entries.get(&id.0).map(|e| e.state)
    }

    /// Drive a background worker loop: block on dequeue, dispatch each
    /// entry to `handler` via `tokio::spawn`, honoring `cancel`. The
    /// returned `JoinHandle` resolves once `cancel` fires and no further
    /// dequeues are in flight.
    ///
    /// `auto_complete = true` calls `complete` automatically after the
    /// handler returns `Ok(())`, unless the handler already resolved the
    /// entry itself.
    pub async fn start_working<F, Fut>(
        self: &Arc<Self>,
        handler: F,
        auto_complete: bool,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Self>, QueueEntry<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let queue = self.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let dequeued = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = queue.dequeue(Some(Duration::from_millis(200))) => r,
                };
                let Ok(Some(entry)) = dequeued else {
                    continue;
                };
                let queue = queue.clone();
                let handler = handler.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let id = entry.id;
                    let child = cancel.child_token();
                    let renew_after = queue
                        .config
                        .work_item_timeout
                        .mul_f64(queue.config.renewal_threshold.clamp(0.05, 0.95));
                    let handler_fut = handler(queue.clone(), entry, child);
                    tokio::pin!(handler_fut);
                    let result = loop {
                        tokio::select! {
                            r = &mut handler_fut => break r,
                            _ = queue.clock.sleep(renew_after) => {
                                if queue.entry_state(id).await == Some(QueueEntryState::Working) {
                                    let _ = queue.renew_lock(id).await;
                                }
                            }
                        }
                    };
                    match result {
                        Ok(()) => {
                            if auto_complete
                                && queue.entry_state(id).await == Some(QueueEntryState::Working)
                            {
                                let _ = queue.complete(id).await;
                            }
                        }
                        Err(_) => {
                            queue.counters.errors.fetch_add(1, Ordering::SeqCst);
                            if queue.entry_state(id).await == Some(QueueEntryState::Working) {
                                let _ = queue.abandon(id).await;
                            }
                        }
                    }
                });
            }
        })
    }
}

impl<T> Drop for InMemoryQueue<T> {
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T> QueueClient<T> for InMemoryQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn enqueue(&self, data: T) -> CoreResult<Option<QueueEntryId>> {
        let hooks = self.hooks.enqueuing.read().await.clone();
        let mut data = data;
        for hook in hooks {
            let (returned, cancel) = hook(data).await;
            data = returned;
            if cancel {
                return Ok(None);
            }
        }

        let id = Uuid::new_v4();
        let now = self.clock.now_millis();
        {
            let mut guard = self.state.lock().await;
            guard.entries.insert(
                id,
                Internal {
                    data,
                    enqueued_at: now,
                    dequeue_count: 0,
                    lease_expires_at: None,
                    state: QueueEntryState::Queued,
                },
            );
            guard.queued.push_back(id);
        }
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        let entry_id = QueueEntryId(id);
        Self::fire(&self.hooks.enqueued, entry_id).await;
        Ok(Some(entry_id))
    }

    async fn dequeue(&self, timeout: Option<Duration>) -> CoreResult<Option<QueueEntry<T>>> {
        let deadline = timeout.map(|d| self.clock.now_millis() + d.as_millis() as i64);
        loop {
            {
                let mut guard = self.state.lock().await;
                while let Some(id) = guard.queued.pop_front() {
                    let now = self.clock.now_millis();
                    let Some(entry) = guard.entries.get_mut(&id) else {
                        continue;
                    };
                    if entry.state != QueueEntryState::Queued {
                        continue;
                    }
                    entry.dequeue_count += 1;
                    entry.lease_expires_at = Some(now + self.config.work_item_timeout.as_millis() as i64);
                    entry.state = QueueEntryState::Working;
                    let snapshot = entry.snapshot(QueueEntryId(id));
                    drop(guard);
                    self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
                    Self::fire(&self.hooks.dequeued, snapshot.id).await;
                    return Ok(Some(snapshot));
                }
            }

            let Some(deadline) = deadline else {
                self.notify.notified().await;
                continue;
            };
            let remaining = deadline - self.clock.now_millis();
            if remaining <= 0 {
                return Ok(None);
            }
            let wait = Duration::from_millis(remaining as u64);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => return Ok(None),
            }
        }
    }

    async fn complete(&self, id: QueueEntryId) -> CoreResult<()> {
        {
            let mut guard = self.state.lock().await;
            let entry = guard
                .entries
                .get_mut(&id.0)
                .ok_or_else(|| CoreError::invalid_state(format!("unknown queue entry {id}")))?;
            if entry.state != QueueEntryState::Working {
                return Err(CoreError::invalid_state(format!(
                    "entry {id} is not in the working state"
                )));
            }
            entry.state = QueueEntryState::Completed;
            entry.lease_expires_at = None;
        }
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        Self::fire(&self.hooks.completed, id).await;
        Ok(())
    }

    async fn abandon(&self, id: QueueEntryId) -> CoreResult<()> {
        let requeued = {
            let mut guard = self.state.lock().await;
            let entry = guard
                .entries
                .get_mut(&id.0)
                .ok_or_else(|| CoreError::invalid_state(format!("unknown queue entry {id}")))?;
            if entry.state != QueueEntryState::Working {
                return Err(CoreError::invalid_state(format!(
                    "entry {id} is not in the working state"
                )));
            }
            if entry.dequeue_count <= self.config.max_attempts {
                entry.state = QueueEntryState::Queued;
                entry.lease_expires_at = None;
                guard.queued.push_back(id.0);
                true
            } else {
                entry.state = QueueEntryState::DeadLettered;
                guard.deadletter.push(id.0);
                false
            }
        };
        self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
        if requeued {
            self.notify.notify_one();
            log::debug!("entry {id} abandoned and requeued");
        } else {
            log::warn!("entry {id} abandoned and dead-lettered");
        }
        Self::fire(&self.hooks.abandoned, id).await;
        Ok(())
    }

    async fn renew_lock(&self, id: QueueEntryId) -> CoreResult<()> {
        {
            let mut guard = self.state.lock().await;
            let now = self.clock.now_millis();
            let entry = guard
                .entries
                .get_mut(&id.0)
                .ok_or_else(|| CoreError::invalid_state(format!("unknown queue entry {id}")))?;
            if entry.state != QueueEntryState::Working {
                return Err(CoreError::invalid_state(format!(
                    "entry {id} is not in the working state"
                )));
            }
            entry.lease_expires_at = Some(now + self.config.work_item_timeout.as_millis() as i64);
        }
        Self::fire(&self.hooks.lock_renewed, id).await;
        Ok(())
    }

    async fn get_stats(&self) -> QueueStats {
        let guard = self.state.lock().await;
        let working_depth = guard
            .entries
            .values()
            .filter(|e| e.state == QueueEntryState::Working)
            .count() as u64;
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            dequeued: self.counters.dequeued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            abandoned: self.counters.abandoned.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
            timeouts: self.counters.timeouts.load(Ordering::SeqCst),
            queued_depth: guard.queued.len() as u64,
            working_depth,
            deadletter_depth: guard.deadletter.len() as u64,
        }
    }

    async fn get_deadletter_items(&self) -> Vec<QueueEntry<T>> {
        let guard = self.state.lock().await;
        guard
            .deadletter
            .iter()
            .filter_map(|id| guard.entries.get(id).map(|e| e.snapshot(QueueEntryId(*id))))
            .collect()
    }

    async fn delete_queue(&self) -> CoreResult<()> {
        let mut guard = self.state.lock().await;
        guard.entries.clear();
        guard.queued.clear();
        guard.deadletter.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::atomic::AtomicUsize;

    fn queue<T: Clone + Send + Sync + 'static>(config: QueueConfig) -> Arc<InMemoryQueue<T>> {
        Arc::new(InMemoryQueue::with_config(Arc::new(SystemClock::new()), config))
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig::default());
        let id = q.enqueue(42).await.unwrap().unwrap();
        let entry = q.dequeue(Some(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.data, 42);
        assert_eq!(entry.dequeue_count, 1);
        q.complete(entry.id).await.unwrap();
        let stats = q.get_stats().await;
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig::default());
        let entry = q.dequeue(Some(Duration::from_millis(30))).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn complete_on_non_working_entry_is_invalid_state() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig::default());
        let id = q.enqueue(1).await.unwrap().unwrap();
        let err = q.complete(id).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));
    }

    #[tokio::test]
    async fn lease_expiry_reassigns_to_next_dequeue() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig {
            work_item_timeout: Duration::from_millis(100),
            max_attempts: 2,
            lease_sweep_interval: Duration::from_millis(20),
            renewal_threshold: 0.5,
        });
        q.enqueue(7).await.unwrap();
        let first = q.dequeue(Some(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(first.dequeue_count, 1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = q.dequeue(Some(Duration::from_millis(50))).await.unwrap().unwrap();
        assert_eq!(second.dequeue_count, 2);
        q.complete(second.id).await.unwrap();
        let stats = q.get_stats().await;
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dequeued, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.abandoned, 0);
    }

    #[tokio::test]
    async fn abandon_twice_past_max_attempts_dead_letters() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig {
            work_item_timeout: Duration::from_secs(30),
            max_attempts: 1,
            lease_sweep_interval: Duration::from_millis(20),
            renewal_threshold: 0.5,
        });
        q.enqueue(1).await.unwrap();
        let e1 = q.dequeue(Some(Duration::from_millis(50))).await.unwrap().unwrap();
        q.abandon(e1.id).await.unwrap();
        let e2 = q.dequeue(Some(Duration::from_millis(50))).await.unwrap().unwrap();
        q.abandon(e2.id).await.unwrap();
        let stats = q.get_stats().await;
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.deadletter_depth, 1);
        assert_eq!(q.get_deadletter_items().await.len(), 1);
    }

    #[tokio::test]
    async fn start_working_auto_completes_successful_handlers() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig::default());
        let processed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let p = processed.clone();
        let handle = q
            .start_working(
                move |_queue, entry, _cancel| {
                    let p = p.clone();
                    async move {
                        p.fetch_add(entry.data as usize, Ordering::SeqCst);
                        Ok(())
                    }
                },
                true,
                cancel.clone(),
            )
            .await;
        q.enqueue(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert_eq!(processed.load(Ordering::SeqCst), 10);
        let stats = q.get_stats().await;
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn start_working_abandons_on_handler_error() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig {
            work_item_timeout: Duration::from_secs(30),
            max_attempts: 5,
            lease_sweep_interval: Duration::from_millis(20),
            renewal_threshold: 0.5,
        });
        let cancel = CancellationToken::new();
        let handle = q
            .start_working(
                |_queue, _entry, _cancel| async move { Err(CoreError::invalid_state("boom")) },
                true,
                cancel.clone(),
            )
            .await;
        q.enqueue(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        let stats = q.get_stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.abandoned, 1);
    }

    #[tokio::test]
    async fn start_working_renews_lease_for_slow_handlers() {
        let q: Arc<InMemoryQueue<i32>> = queue(QueueConfig {
            work_item_timeout: Duration::from_millis(100),
            max_attempts: 3,
            lease_sweep_interval: Duration::from_millis(20),
            renewal_threshold: 0.3,
        });
        let renewals = Arc::new(AtomicUsize::new(0));
        let r = renewals.clone();
        q.on_lock_renewed(move |_id| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        let cancel = CancellationToken::new();
        let handle = q
            .start_working(
                |_queue, _entry, _cancel| async move {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok(())
                },
                true,
                cancel.clone(),
            )
            .await;
        q.enqueue(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(renewals.load(Ordering::SeqCst) >= 1);
        let stats = q.get_stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.timeouts, 0);
    }
}
