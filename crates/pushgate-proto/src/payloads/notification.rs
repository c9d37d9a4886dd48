//! Notification intake payloads.

use serde::{Deserialize, Serialize};

/// One "someone has a message" signal.
///
/// The service never sees who the recipient is: `ephemeral_id` is the
/// rotating pseudonymous id the gateway delivered to, and the fingerprint and
/// hash are opaque values the device uses to find the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Recipient's ephemeral id at the time of the round
    pub ephemeral_id: i64,
    /// Identity fingerprint the device checks against its own identities
    pub identity_fingerprint: Vec<u8>,
    /// Hash of the message waiting for the device
    pub message_hash: Vec<u8>,
}

/// All notification signals produced by one round.
///
/// # Protocol Flow
///
/// 1. A round completes on the network
/// 2. Every gateway that handled the round pushes the same batch
/// 3. The service accepts the first copy per `round_id` and drops the rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Round that produced these signals
    pub round_id: u64,
    /// Signals in the order the gateway saw them
    pub notifications: Vec<NotificationData>,
}

impl crate::csv::CsvEntry for NotificationData {
    fn message_hash(&self) -> &[u8] {
        &self.message_hash
    }

    fn identity_fingerprint(&self) -> &[u8] {
        &self.identity_fingerprint
    }
}
