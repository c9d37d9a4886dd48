//! Simulated clock.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use pushgate_core::env::{Environment, unix_nanos};

/// Environment whose wall clock is pinned to a chosen start time.
///
/// Time moves with tokio's clock (so `#[tokio::test(start_paused = true)]`
/// auto-advance drives it) plus any manual [`advance`](Self::advance).
/// Clones share the same clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    inner: Arc<Clock>,
}

#[derive(Debug)]
struct Clock {
    base: Duration,
    started: tokio::time::Instant,
    skew: Mutex<Duration>,
}

impl SimEnv {
    /// Clock reading `unix_time` right now.
    pub fn at(unix_time: Duration) -> Self {
        Self {
            inner: Arc::new(Clock {
                base: unix_time,
                started: tokio::time::Instant::now(),
                skew: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Jump the wall clock forward without sleeping.
    pub fn advance(&self, by: Duration) {
        *self.inner.skew.lock() += by;
    }

    /// Current time in unix nanoseconds, as requests carry it.
    pub fn now_nanos(&self) -> i64 {
        unix_nanos(self.unix_time())
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::at(Duration::from_secs(1_704_067_200))
    }
}

impl Environment for SimEnv {
    fn unix_time(&self) -> Duration {
        self.inner.base + self.inner.started.elapsed() + *self.inner.skew.lock()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
