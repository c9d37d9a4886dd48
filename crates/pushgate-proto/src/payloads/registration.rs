//! Registration payloads.
//!
//! Two generations of the protocol coexist. The legacy pair binds one token
//! to one identity in a single call and authorizes unregistration by
//! identity alone. The current set splits tokens from tracked identities so a
//! user can run several devices and follow several identities, and every
//! request carries a `request_timestamp` signed under a [`SignatureTag`]
//! specific to the operation.
//!
//! All timestamps are unix nanoseconds.
//!
//! [`SignatureTag`]: crate::SignatureTag

use serde::{Deserialize, Serialize};

/// Legacy registration of a token for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterForNotificationsRequest {
    /// Push token issued by the provider
    pub token: String,
    /// Identity the token should be notified for
    pub intermediary_id: Vec<u8>,
    /// User's transmission public key (PEM)
    pub transmission_key_pem: String,
    /// Salt the user registered with the permissioning service
    pub transmission_key_salt: Vec<u8>,
    /// Permissioning signature over key, salt and registration timestamp
    pub permissioning_sig: Vec<u8>,
    /// Transmission-key signature over token and intermediary id
    pub intermediary_id_sig: Vec<u8>,
    /// When the permissioning service enrolled the key
    pub registration_timestamp: i64,
}

/// Legacy unregistration of everything belonging to an identity's user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterForNotificationsRequest {
    /// Identity whose registration is removed
    pub intermediary_id: Vec<u8>,
    /// Signature over the intermediary id by the registered user's key
    pub intermediary_id_sig: Vec<u8>,
}

/// Register a device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTokenRequest {
    /// Provider/app tag, selects the push provider
    pub app: String,
    /// Push token issued by the provider
    pub token: String,
    /// User's transmission public key (PEM)
    pub transmission_key_pem: String,
    /// Salt the user registered with the permissioning service
    pub transmission_key_salt: Vec<u8>,
    /// When the permissioning service enrolled the key
    pub registration_timestamp: i64,
    /// Permissioning signature over key, salt and registration timestamp
    pub permissioning_sig: Vec<u8>,
    /// When the client built this request
    pub request_timestamp: i64,
    /// Transmission-key signature under `SignatureTag::RegisterToken`
    pub token_sig: Vec<u8>,
}

/// Start tracking identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTrackedIdRequest {
    /// Intermediary ids to track
    pub tracked_ids: Vec<Vec<u8>>,
    /// User's transmission public key (PEM)
    pub transmission_key_pem: String,
    /// Salt the user registered with the permissioning service
    pub transmission_key_salt: Vec<u8>,
    /// When the permissioning service enrolled the key
    pub registration_timestamp: i64,
    /// Permissioning signature over key, salt and registration timestamp
    pub permissioning_sig: Vec<u8>,
    /// When the client built this request
    pub request_timestamp: i64,
    /// Transmission-key signature under `SignatureTag::RegisterTrackedId`
    pub signature: Vec<u8>,
}

/// Remove a device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterTokenRequest {
    /// Provider/app tag the token was registered under
    pub app: String,
    /// Push token to remove
    pub token: String,
    /// User's transmission public key (PEM)
    pub transmission_key_pem: String,
    /// When the client built this request
    pub request_timestamp: i64,
    /// Transmission-key signature under `SignatureTag::UnregisterToken`
    pub token_sig: Vec<u8>,
}

/// Stop tracking identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterTrackedIdRequest {
    /// Intermediary ids to stop tracking
    pub tracked_ids: Vec<Vec<u8>>,
    /// User's transmission public key (PEM)
    pub transmission_key_pem: String,
    /// When the client built this request
    pub request_timestamp: i64,
    /// Transmission-key signature under `SignatureTag::UnregisterTrackedId`
    pub signature: Vec<u8>,
}
