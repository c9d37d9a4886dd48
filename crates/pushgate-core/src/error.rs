//! Error types for the core services.

use std::time::Duration;

use thiserror::Error;

/// Storage backend failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed (I/O, transaction, corruption)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded
    #[error("storage encoding error: {0}")]
    Encoding(String),

    /// A write referenced a record that does not exist
    #[error("missing reference: {0}")]
    MissingReference(String),
}

/// Notification intake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// Caller is not an authenticated gateway
    #[error("notification batches are only accepted from authenticated gateways")]
    Unauthenticated,
}

/// Registration request failures.
///
/// Every variant except `Storage` is raised before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Push token was empty
    #[error("token must not be empty")]
    EmptyToken,

    /// App tag was empty
    #[error("app must not be empty")]
    EmptyApp,

    /// Tracked-id request carried no ids
    #[error("at least one tracked id is required")]
    NoTrackedIds,

    /// An intermediary id was empty
    #[error("intermediary id must not be empty")]
    EmptyIntermediaryId,

    /// Public key could not be parsed
    #[error("invalid transmission key: {0}")]
    InvalidKey(String),

    /// A signature did not verify
    #[error("invalid {what} signature")]
    InvalidSignature {
        /// Which signature failed
        what: &'static str,
    },

    /// Request timestamp is outside the replay window
    #[error("request timestamp is {skew:?} away from now, window is {window:?}")]
    StaleRequest {
        /// Distance between request time and now
        skew: Duration,
        /// Allowed distance
        window: Duration,
    },

    /// Legacy unregister found several users behind one identity
    #[error("identity is shared by {users} users, refusing to unregister")]
    AmbiguousIdentity {
        /// Number of linked users
        users: usize,
    },

    /// Storage failed while applying the request
    #[error(transparent)]
    Storage(#[from] StorageError),
}
