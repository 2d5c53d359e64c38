//! Abstract time source.
//!
//! Every expiry decision in the crate routes through a [`Clock`] rather than
//! calling `Instant::now()`/`SystemTime::now()` directly, so tests can
//! substitute a deterministic source instead of racing real wall-clock time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

/// A replaceable source of monotonic instants and wall-clock time.
///
/// `now()` returns milliseconds since the Unix epoch, which is the unit the
/// rest of the crate uses for expiry comparisons (`expires_at`, lease
/// deadlines, throttle window boundaries).
#[async_trait::async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Suspend the caller for `d`. Implementations used in production must
    /// actually sleep; test clocks may resolve immediately after advancing
    /// their internal cursor.
    async fn sleep(&self, d: Duration);
}

/// Real wall-clock time backed by `SystemTime` and `tokio::time::sleep`.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Construct a new system clock.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as i64
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// `sleep` does not block; it simply returns immediately. Tests drive time
/// forward explicitly with [`TestClock::advance`] and then observe expiry
/// behavior synchronously.
#[derive(Debug, Clone)]
pub struct TestClock {
    millis: Arc<Mutex<i64>>,
}

impl TestClock {
    /// Construct a test clock starting at the given epoch-millis value.
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: Arc::new(Mutex::new(start_millis)),
        }
    }

    /// Move the clock forward by `d`.
    pub async fn advance(&self, d: Duration) {
        let mut m = self.millis.lock().await;
        *m += d.as_millis() as i64;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait::async_trait]
impl Clock for TestClock {
    fn now_millis(&self) -> i64 {
        // blocking_lock is safe here: the mutex is never held across an
        // await point, only for the duration of a read/increment.
        match self.millis.try_lock() {
            Ok(guard) => *guard,
            Err(_) => 0,
        }
    }

    async fn sleep(&self, _d: Duration) {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_clock_advances() {
        let clock = SystemClock::new();
        let t0 = clock.now_millis();
        clock.sleep(Duration::from_millis(5)).await;
        let t1 = clock.now_millis();
        assert!(t1 >= t0);
    }

    #[tokio::test]
    async fn test_clock_only_moves_on_advance() {
        let clock = TestClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.sleep(Duration::from_secs(60)).await;
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_millis(), 1_250);
    }
}
