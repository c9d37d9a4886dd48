//! RPC payload types.
//!
//! [`Request`] is the envelope for every inbound call; the transport decodes
//! one per frame and the service answers each with exactly one [`Response`].

pub mod notification;
pub mod registration;

pub use notification::{NotificationBatch, NotificationData};
pub use registration::{
    RegisterForNotificationsRequest, RegisterTokenRequest, RegisterTrackedIdRequest,
    UnregisterForNotificationsRequest, UnregisterTokenRequest, UnregisterTrackedIdRequest,
};
use serde::{Deserialize, Serialize};

use crate::{codec, errors::Result};

/// Inbound RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Gateway push of one round's notification signals.
    NotificationBatch(NotificationBatch),
    /// Legacy single-call registration of token and identity.
    RegisterForNotifications(RegisterForNotificationsRequest),
    /// Legacy unregistration by identity.
    UnregisterForNotifications(UnregisterForNotificationsRequest),
    /// Register a device token for a user.
    RegisterToken(RegisterTokenRequest),
    /// Start tracking identities for a user.
    RegisterTrackedId(RegisterTrackedIdRequest),
    /// Remove a device token.
    UnregisterToken(UnregisterTokenRequest),
    /// Stop tracking identities for a user.
    UnregisterTrackedId(UnregisterTrackedIdRequest),
}

impl Request {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotificationBatch(_) => "notification_batch",
            Self::RegisterForNotifications(_) => "register_for_notifications",
            Self::UnregisterForNotifications(_) => "unregister_for_notifications",
            Self::RegisterToken(_) => "register_token",
            Self::RegisterTrackedId(_) => "register_tracked_id",
            Self::UnregisterToken(_) => "unregister_token",
            Self::UnregisterTrackedId(_) => "unregister_tracked_id",
        }
    }

    /// Encode as a CBOR document.
    pub fn encode(&self) -> Result<bytes::Bytes> {
        codec::encode(self)
    }

    /// Decode from a CBOR document.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

/// Outcome of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The call succeeded (or was an accepted duplicate).
    Ok,
    /// The call was rejected; no state was changed.
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl Response {
    /// Build an error response from anything displayable.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error { message: err.to_string() }
    }

    /// Whether this is [`Response::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Encode as a CBOR document.
    pub fn encode(&self) -> Result<bytes::Bytes> {
        codec::encode(self)
    }

    /// Decode from a CBOR document.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}
