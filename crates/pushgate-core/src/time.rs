//! Epoch time model and ephemeral id derivation.
//!
//! Wall-clock time is cut into `offset_phase` slices called epochs. Every
//! identity is assigned permanently to one of `num_offsets` phases, and its
//! ephemeral id rotates once per `period`, at the epochs congruent to its
//! phase. Spreading identities over phases spreads rotation work evenly:
//! each epoch only a `1 / num_offsets` share of identities rotate.
//!
//! ```text
//!  period = num_offsets * offset_phase
//!  |<------------------------------- period ------------------------------->|
//!  | e0 | e1 | e2 | ... |                                          | eN-1 | e0'
//!    ^ identities with offset 0 rotate here, and again at e0'
//! ```

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Default rotation period (24 hours).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of rotation phases.
pub const DEFAULT_NUM_OFFSETS: u64 = 1 << 16;

/// Rotation schedule shared by the scheduler, registration and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeModel {
    period: Duration,
    num_offsets: u64,
    phase_nanos: u64,
}

impl Default for TimeModel {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD, DEFAULT_NUM_OFFSETS)
    }
}

impl TimeModel {
    /// Create a time model.
    ///
    /// `num_offsets` is clamped to at least 1 and the resulting phase to at
    /// least one nanosecond.
    pub fn new(period: Duration, num_offsets: u64) -> Self {
        let num_offsets = num_offsets.max(1);
        let period_nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        let phase_nanos = (period_nanos / num_offsets).max(1);
        Self { period, num_offsets, phase_nanos }
    }

    /// Length of a full rotation.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of rotation phases.
    pub fn num_offsets(&self) -> u64 {
        self.num_offsets
    }

    /// Length of one epoch.
    pub fn offset_phase(&self) -> Duration {
        Duration::from_nanos(self.phase_nanos)
    }

    /// Epoch containing unix time `time`.
    pub fn epoch_at(&self, time: Duration) -> i32 {
        let epoch = time.as_nanos() / u128::from(self.phase_nanos);
        i32::try_from(epoch).unwrap_or(i32::MAX)
    }

    /// Unix time at which `epoch` begins.
    pub fn epoch_start(&self, epoch: i32) -> Duration {
        let epoch = u64::try_from(epoch).unwrap_or(0);
        Duration::from_nanos(epoch.saturating_mul(self.phase_nanos))
    }

    /// Time left until the next epoch boundary after `time`.
    pub fn until_next_boundary(&self, time: Duration) -> Duration {
        let into_phase = (time.as_nanos() % u128::from(self.phase_nanos)) as u64;
        Duration::from_nanos(self.phase_nanos - into_phase)
    }

    /// Rotation phase of an identity.
    pub fn offset_of(&self, intermediary_id: &[u8]) -> u64 {
        hash_prefix(&[intermediary_id]) % self.num_offsets
    }

    /// Rotation phase whose identities rotate at `epoch`.
    pub fn offset_for_epoch(&self, epoch: i32) -> u64 {
        i64::from(epoch).rem_euclid(self.num_offsets as i64) as u64
    }

    /// Latest epoch at or before `target` belonging to `offset`.
    pub fn aligned_epoch(&self, target: i32, offset: u64) -> i32 {
        let n = self.num_offsets as i64;
        let back = (i64::from(target) - (offset % self.num_offsets) as i64).rem_euclid(n);
        (i64::from(target) - back) as i32
    }

    /// Ephemeral id of an identity for the rotation starting at `epoch`.
    ///
    /// The id is truncated to `address_space_size` bits so that it matches
    /// the id space the network currently routes on.
    pub fn ephemeral_id(&self, intermediary_id: &[u8], epoch: i32, address_space_size: u8) -> i64 {
        let raw = hash_prefix(&[intermediary_id, &epoch.to_be_bytes()]);
        let masked = match address_space_size {
            0 => 0,
            bits if bits >= 64 => raw,
            bits => raw & ((1u64 << bits) - 1),
        };
        masked as i64
    }

    /// Ephemeral id an identity is reachable under at unix time `now`, with
    /// the epoch it was rotated in at.
    pub fn current_ephemeral(
        &self,
        intermediary_id: &[u8],
        now: Duration,
        address_space_size: u8,
    ) -> (i64, i32) {
        let epoch = self.aligned_epoch(self.epoch_at(now), self.offset_of(intermediary_id));
        (self.ephemeral_id(intermediary_id, epoch, address_space_size), epoch)
    }
}

/// First 8 bytes of SHA-256 over the concatenated parts, big endian.
fn hash_prefix(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
