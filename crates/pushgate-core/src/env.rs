//! Environment abstraction.
//!
//! Everything in the core that depends on wall-clock time reads it through
//! [`Environment`] so tests can pin the clock (replay windows, dedup TTLs,
//! epoch boundaries) instead of racing the system clock.

use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of time for the service.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Wall-clock time since the unix epoch.
    fn unix_time(&self) -> Duration;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Production environment backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn unix_time(&self) -> Duration {
        // A clock before 1970 is a broken host; treat it as the epoch
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Convert a unix duration to the signed nanoseconds used on the wire.
pub fn unix_nanos(time: Duration) -> i64 {
    i64::try_from(time.as_nanos()).unwrap_or(i64::MAX)
}
