//! Jobs and schedulers: a `Job` is `run(cancel) -> Outcome`; a `JobRunner`
//! drives one under a chosen mode (once, continuous, or cron-scheduled).
//!
//! Grounded in `scheduling::scheduler::{Job, JobSchedule, JobExecutor}`
//! (`examples/harborgrid-justin-caddy/src/scheduling/scheduler.rs`), but
//! the teacher's `Job` is a persisted data record driving a Redis-backed
//! scheduler; here a job is the unit of *behavior* itself (an
//! `async fn(CancellationToken) -> JobOutcome`), and `JobSchedule`/`cron`
//! drive only the "when to run it next" decision.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cron::Schedule as CronSchedule;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::queue::memory::InMemoryQueue;
use crate::queue::{QueueClient, QueueEntry};

/// The outcome of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job finished its work for this tick.
    Completed,
    /// Cancellation fired before the job finished.
    Cancelled,
    /// The job failed; the reason is implementation-defined text.
    Failed(String),
}

/// A unit of work that can be driven repeatedly by a [`JobRunner`].
#[async_trait]
pub trait Job: Send + Sync {
    /// Run one tick of the job, cooperating with `cancel`.
    async fn run(&self, cancel: CancellationToken) -> JobOutcome;

    /// A human-readable name, used only for logging.
    fn name(&self) -> &str {
        "job"
    }
}

/// Blanket impl so a plain async closure can be used as a [`Job`] without a
/// wrapper type.
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send,
{
    /// Wrap an async closure as a [`Job`].
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = JobOutcome> + Send,
{
    async fn run(&self, cancel: CancellationToken) -> JobOutcome {
        (self.f)(cancel).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// How a [`JobRunner`] drives a [`Job`].
pub enum RunMode {
    /// Run exactly once.
    Once,
    /// Loop until cancelled. On `Completed`, sleep `interval` before the
    /// next tick; on `Failed`, sleep `retry_interval` instead.
    Continuous {
        /// Delay between successful ticks.
        interval: Duration,
        /// Delay before retrying after a failed tick.
        retry_interval: Duration,
    },
    /// Trigger a run at each instant the cron expression next matches.
    Scheduled {
        /// Standard five/six-field cron expression.
        expression: String,
    },
}

/// Drives a [`Job`] under a [`RunMode`].
pub struct JobRunner {
    job: Arc<dyn Job>,
    mode: RunMode,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    /// Construct a runner for `job` under `mode`.
    pub fn new(job: Arc<dyn Job>, mode: RunMode, clock: Arc<dyn Clock>) -> Self {
        Self { job, mode, clock }
    }

    /// Drive the job to completion according to its mode. For `Once` this
    /// resolves after a single tick; for `Continuous`/`Scheduled` it runs
    /// until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> CoreResult<()> {
        match &self.mode {
            RunMode::Once => {
                let _ = self.job.run(cancel).await;
                Ok(())
            }
            RunMode::Continuous {
                interval,
                retry_interval,
            } => self.run_continuous(*interval, *retry_interval, cancel).await,
            RunMode::Scheduled { expression } => self.run_scheduled(expression, cancel).await,
        }
    }

    async fn run_continuous(
        &self,
        interval: Duration,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> CoreResult<()> {
        log::info!("job '{}' starting in continuous mode", self.job.name());
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let outcome = self.job.run(cancel.child_token()).await;
            let base = match outcome {
                JobOutcome::Completed => interval,
                JobOutcome::Cancelled => return Ok(()),
                JobOutcome::Failed(ref reason) => {
                    log::warn!("job '{}' tick failed: {reason}", self.job.name());
                    retry_interval
                }
            };
            let jittered = jittered_delay(base);
            tokio::select! {
                _ = self.clock.sleep(jittered) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn run_scheduled(&self, expression: &str, cancel: CancellationToken) -> CoreResult<()> {
        let schedule = CronSchedule::from_str(expression)
            .map_err(|e| CoreError::invalid_argument(format!("invalid cron expression: {e}")))?;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let now = chrono::Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                return Ok(());
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
            let _ = self.job.run(cancel.child_token()).await;
        }
    }
}

/// ±10% jitter around `base`, avoiding a thundering herd across many
/// runner instances sharing the same interval.
fn jittered_delay(base: Duration) -> Duration {
    let millis = base.as_millis() as f64;
    if millis == 0.0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
    let adjusted = (millis * (1.0 + jitter)).max(0.0);
    Duration::from_millis(adjusted as u64)
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = CoreResult<()>> + Send + 'a>>;

/// A [`Job`] that wraps [`InMemoryQueue::start_working`] and resolves once
/// its cancellation token fires.
pub struct WorkItemQueueJob<T> {
    queue: Arc<InMemoryQueue<T>>,
    handler: Arc<dyn Fn(Arc<InMemoryQueue<T>>, QueueEntry<T>, CancellationToken) -> BoxFuture<'static> + Send + Sync>,
    auto_complete: bool,
    name: String,
}

impl<T> WorkItemQueueJob<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `queue` with `handler`, dispatched via `start_working`.
    pub fn new<F, Fut>(name: impl Into<String>, queue: Arc<InMemoryQueue<T>>, auto_complete: bool, handler: F) -> Self
    where
        F: Fn(Arc<InMemoryQueue<T>>, QueueEntry<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        Self {
            queue,
            handler: Arc::new(move |q, e, c| Box::pin(handler(q, e, c)) as BoxFuture<'static>),
            auto_complete,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<T> Job for WorkItemQueueJob<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(&self, cancel: CancellationToken) -> JobOutcome {
        let handler = self.handler.clone();
        let handle = self
            .queue
            .start_working(
                move |q, e, c| (handler)(q, e, c),
                self.auto_complete,
                cancel.clone(),
            )
            .await;
        match handle.await {
            Ok(()) => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed(e.to_string()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
