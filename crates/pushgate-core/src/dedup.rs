//! Round deduplication.
//!
//! Gateways may deliver the same round more than once (retries, several
//! gateways finishing the same round). The first batch for a round id is
//! accepted; later ones inside the TTL are dropped. Entries are swept after
//! the TTL, after which a round id is accepted again.

use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::env::Environment;

/// How long a round id is remembered.
pub const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// How often the cleaner sweeps.
pub const CLEAN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Map of round id to first-seen time.
#[derive(Debug)]
pub struct RoundDedup {
    seen: DashMap<u64, Duration>,
    ttl: Duration,
}

impl Default for RoundDedup {
    fn default() -> Self {
        Self::new(DEDUP_TTL)
    }
}

impl RoundDedup {
    /// Create an empty map with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { seen: DashMap::new(), ttl }
    }

    /// Record `round_id` as seen at `now`.
    ///
    /// Returns `true` if this is the first sighting, `false` if the round is
    /// already known. The check and insert are one atomic step.
    pub fn check_and_insert(&self, round_id: u64, now: Duration) -> bool {
        match self.seen.entry(round_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            },
        }
    }

    /// Remove every entry first seen more than one TTL before `now`.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self, now: Duration) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| now.saturating_sub(*first_seen) <= self.ttl);
        before.saturating_sub(self.seen.len())
    }

    /// Number of remembered rounds.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no rounds are remembered.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Sweep `dedup` every `interval` until `cancel` fires.
pub async fn run_cleaner<E: Environment>(
    dedup: Arc<RoundDedup>,
    env: E,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = env.sleep(interval) => {},
        }

        let evicted = dedup.sweep(env.unix_time());
        debug!(evicted, remaining = dedup.len(), "swept round dedup");
    }
}
