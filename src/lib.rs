//! # warden
//!
//! Coordinated caching, queueing, messaging, locking, and job-scheduling
//! primitives for distributed applications, built around a small set of
//! abstract contracts rather than any one backend.
//!
//! ## Architecture
//!
//! - `clock`: the `Clock` seam everything time-based is driven through, so
//!   tests can advance time deterministically instead of sleeping
//! - `error`: the crate-wide `CoreError` every component shares
//! - `serializer`: the pluggable encode/decode boundary between Rust values
//!   and the bytes a cache or bus actually stores
//! - `cache`: `CacheClient`, the keyed store contract, plus `ScopedCache`
//! - `bus`: `MessageBus`, the topic pub/sub contract
//! - `hybrid`: a two-tier cache combining a local `CacheClient` with a
//!   remote one, kept coherent over a `MessageBus`
//! - `lock`: `CacheLockProvider` (distributed mutex) and `lock::throttle`
//!   (fixed-window rate limiting), both built on `CacheClient`
//! - `queue`: `QueueClient`, a leased work queue with retries and
//!   dead-lettering
//! - `jobs`: `Job` and `JobRunner`, driving work once, continuously, or on
//!   a cron schedule

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod cache;
pub mod clock;
pub mod error;
pub mod hybrid;
pub mod jobs;
pub mod lock;
pub mod queue;
pub mod serializer;

pub use bus::MessageBus;
pub use cache::{CacheClient, CacheValue, ScopedCache, Ttl};
pub use clock::{Clock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use hybrid::HybridCache;
pub use jobs::{Job, JobOutcome, JobRunner, RunMode};
pub use lock::{throttle::ThrottlingLockProvider, CacheLockProvider, LockHandle};
pub use queue::{QueueClient, QueueEntry, QueueEntryId, QueueEntryState, QueueStats};
pub use serializer::{JsonSerializer, Serializer};

/// The crate's semantic version, as published in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The crate's package name, as published in `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
