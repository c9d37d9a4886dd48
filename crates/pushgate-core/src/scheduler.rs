//! Ephemeral epoch scheduler.
//!
//! Two loops keep the ephemeral table in step with the clock:
//!
//! - **Creation** materializes ephemerals for `epoch(now + creation_lead)`
//!   on every epoch boundary, so an identity's next id exists before gateways
//!   start addressing it.
//! - **Deletion** removes ephemerals whose epoch is older than
//!   `epoch(now - deletion_delay)`. The delay is longer than a full period, so
//!   an id stays resolvable for at least one rotation after it was issued.
//!
//! # Cursor
//!
//! Creation keeps a cursor: the next epoch still to be materialized. It only
//! moves past an epoch once that epoch was written, so an epoch that failed
//! on a storage error is retried on the next tick instead of being skipped.
//! On start the cursor resumes after the newest stored epoch, bounded by
//! `max_lookback` so a long outage does not replay days of epochs.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    directory::Directory,
    env::Environment,
    error::StorageError,
    storage::{self, Ephemeral, Storage},
    time::TimeModel,
};

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How far ahead of now ephemerals are created
    pub creation_lead: Duration,
    /// How far behind now ephemerals are kept
    pub deletion_delay: Duration,
    /// Oldest epoch the creation cursor resumes from
    pub max_lookback: Duration,
}

impl SchedulerConfig {
    /// Defaults for a time model: five minutes of lead, one period plus five
    /// minutes of retention, one day of lookback.
    pub fn for_model(time: &TimeModel) -> Self {
        Self {
            creation_lead: Duration::from_secs(5 * 60),
            deletion_delay: time.period() + Duration::from_secs(5 * 60),
            max_lookback: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::for_model(&TimeModel::default())
    }
}

/// Keeps ephemerals materialized ahead of now and pruned behind it.
#[derive(Debug)]
pub struct EphemeralScheduler<E, S, D> {
    env: E,
    storage: Arc<S>,
    directory: Arc<D>,
    time: TimeModel,
    config: SchedulerConfig,
}

impl<E, S, D> EphemeralScheduler<E, S, D>
where
    E: Environment,
    S: Storage,
    D: Directory,
{
    /// Create a scheduler.
    pub fn new(
        env: E,
        storage: Arc<S>,
        directory: Arc<D>,
        time: TimeModel,
        config: SchedulerConfig,
    ) -> Self {
        Self { env, storage, directory, time, config }
    }

    /// Write the ephemerals of every identity rotating at `epoch`.
    ///
    /// Idempotent. Returns the number of identities covered.
    pub fn materialize_epoch(&self, epoch: i32) -> Result<usize, StorageError> {
        materialize(&*self.storage, &self.time, self.directory.address_space_size(), epoch)
    }

    /// Delete ephemerals that fell out of the retention window at `now`.
    ///
    /// Returns the number deleted.
    pub fn delete_expired(&self, now: Duration) -> Result<usize, StorageError> {
        self.storage.delete_ephemerals_before(self.expiry_threshold(now))
    }

    fn expiry_threshold(&self, now: Duration) -> i32 {
        self.time.epoch_at(now.saturating_sub(self.config.deletion_delay))
    }

    fn lookback_floor(&self, now: Duration) -> i32 {
        self.time.epoch_at(now.saturating_sub(self.config.max_lookback))
    }

    fn creation_target(&self, now: Duration) -> i32 {
        self.time.epoch_at(now + self.config.creation_lead)
    }

    /// Epoch creation resumes from after a restart.
    pub fn initial_cursor(&self, now: Duration) -> i32 {
        let floor = self.lookback_floor(now);
        match self.storage.latest_ephemeral_epoch() {
            Ok(Some(latest)) => latest.saturating_add(1).max(floor),
            Ok(None) => floor,
            Err(err) => {
                warn!(error = %err, "reading latest epoch failed, backfilling from lookback");
                floor
            },
        }
    }

    /// Materialize epochs from `cursor` up to `target` inclusive.
    ///
    /// Stops early on the first failure (leaving the cursor on the failed
    /// epoch) or on cancellation. Yields between epochs so a long backfill
    /// does not starve other tasks.
    pub async fn advance(&self, cursor: &mut i32, target: i32, cancel: &CancellationToken) {
        while *cursor <= target {
            if cancel.is_cancelled() {
                return;
            }

            let (time, size, epoch) = (self.time, self.directory.address_space_size(), *cursor);
            let written =
                storage::blocking(&self.storage, move |s| materialize(s, &time, size, epoch)).await;
            match written {
                Ok(identities) => {
                    if identities > 0 {
                        debug!(epoch = *cursor, identities, "materialized epoch");
                    }
                    *cursor += 1;
                },
                Err(err) => {
                    warn!(epoch = *cursor, error = %err, "materializing epoch failed, retrying next tick");
                    return;
                },
            }

            tokio::task::yield_now().await;
        }
    }

    async fn sleep_to_boundary(&self, cancel: &CancellationToken) -> bool {
        let wait = self.time.until_next_boundary(self.env.unix_time());
        tokio::select! {
            () = cancel.cancelled() => false,
            () = self.env.sleep(wait) => true,
        }
    }

    /// Creation loop. Runs until `cancel` fires.
    pub async fn run_creation(&self, cancel: CancellationToken) {
        let now = self.env.unix_time();
        let mut cursor = self.initial_cursor(now);
        info!(cursor, target = self.creation_target(now), "ephemeral creation started");

        self.advance(&mut cursor, self.creation_target(now), &cancel).await;

        while self.sleep_to_boundary(&cancel).await {
            let now = self.env.unix_time();
            cursor = cursor.max(self.lookback_floor(now));
            self.advance(&mut cursor, self.creation_target(now), &cancel).await;
        }

        info!(cursor, "ephemeral creation stopped");
    }

    /// Deletion loop. Runs until `cancel` fires.
    pub async fn run_deletion(&self, cancel: CancellationToken) {
        info!(delay = ?self.config.deletion_delay, "ephemeral deletion started");

        loop {
            let threshold = self.expiry_threshold(self.env.unix_time());
            let deleted =
                storage::blocking(&self.storage, move |s| s.delete_ephemerals_before(threshold))
                    .await;
            match deleted {
                Ok(0) => {},
                Ok(deleted) => debug!(deleted, "deleted expired ephemerals"),
                Err(err) => warn!(error = %err, "deleting expired ephemerals failed"),
            }

            if !self.sleep_to_boundary(&cancel).await {
                break;
            }
        }

        info!("ephemeral deletion stopped");
    }
}

fn materialize<S: Storage>(
    storage: &S,
    time: &TimeModel,
    address_space_size: u8,
    epoch: i32,
) -> Result<usize, StorageError> {
    let offset = time.offset_for_epoch(epoch);
    let identities = storage.identities_for_offset(offset)?;

    for identity in &identities {
        storage.upsert_ephemeral(&Ephemeral {
            ephemeral_id: time.ephemeral_id(&identity.intermediary_id, epoch, address_space_size),
            epoch,
            intermediary_id: identity.intermediary_id.clone(),
        })?;
    }

    Ok(identities.len())
}
