//! Gateway notification intake.

use std::sync::Arc;

use pushgate_proto::NotificationBatch;
use tracing::debug;

use crate::{
    buffer::{NotificationBuffer, NotificationRecord},
    dedup::RoundDedup,
    env::Environment,
    error::IntakeError,
};

/// What the transport established about the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Caller is an authenticated gateway
    pub is_gateway: bool,
}

impl AuthContext {
    /// Context of an authenticated gateway.
    pub fn gateway() -> Self {
        Self { is_gateway: true }
    }

    /// Context of an anonymous client.
    pub fn client() -> Self {
        Self { is_gateway: false }
    }
}

/// Result of a batch that passed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// First sighting of the round; records were buffered
    Accepted {
        /// Number of records added
        records: usize,
    },
    /// Round already seen inside the dedup window; nothing buffered
    Duplicate,
}

/// Accepts notification batches from gateways.
#[derive(Debug)]
pub struct Intake<E> {
    env: E,
    dedup: Arc<RoundDedup>,
    buffer: Arc<NotificationBuffer>,
}

impl<E: Environment> Intake<E> {
    /// Create an intake writing into `buffer`, deduplicated by `dedup`.
    pub fn new(env: E, dedup: Arc<RoundDedup>, buffer: Arc<NotificationBuffer>) -> Self {
        Self { env, dedup, buffer }
    }

    /// Accept one round's batch.
    ///
    /// A repeated round is not an error: the gateway gets the same success it
    /// got the first time.
    ///
    /// # Errors
    ///
    /// - `IntakeError::Unauthenticated` if the caller is not a gateway
    pub fn receive_notification_batch(
        &self,
        batch: NotificationBatch,
        auth: &AuthContext,
    ) -> Result<IntakeOutcome, IntakeError> {
        if !auth.is_gateway {
            return Err(IntakeError::Unauthenticated);
        }

        if !self.dedup.check_and_insert(batch.round_id, self.env.unix_time()) {
            debug!(round_id = batch.round_id, "dropping duplicate round");
            return Ok(IntakeOutcome::Duplicate);
        }

        let round_id = batch.round_id;
        let records = batch.notifications.len();
        self.buffer
            .extend(batch.notifications.into_iter().map(|data| NotificationRecord::from_data(round_id, data)));

        debug!(round_id, records, "buffered notification batch");
        Ok(IntakeOutcome::Accepted { records })
    }
}
