//! Storage contract.
//!
//! The registry the service works from lives behind [`Storage`]: users keyed
//! by the hash of their transmission key, device tokens owned by users,
//! identities linked to users many-to-many, and the ephemerals derived from
//! identities. Each method is one atomic unit; callers never hold locks
//! across calls, so implementations guard themselves.
//!
//! All deletes are idempotent: removing something that is already gone is
//! `Ok`, which is what lets concurrent dispatch tasks prune the same dead
//! token without coordinating.
//!
//! Methods are synchronous and may block on disk. Async code reaches them
//! through [`blocking`], which runs the call on tokio's blocking pool.

mod memory;

use std::sync::Arc;

pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Owner of push tokens, keyed by the hash of their transmission key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// SHA-256 of `transmission_key_pem`
    pub transmission_key_hash: Vec<u8>,
    /// Transmission public key (PEM)
    pub transmission_key_pem: String,
    /// Permissioning signature the key was enrolled with
    pub signature: Vec<u8>,
}

/// A device push token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Provider-issued token
    pub token: String,
    /// Provider/app tag
    pub app: String,
    /// Owning user's key hash
    pub owner: Vec<u8>,
}

/// A long-term pseudonymous identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Intermediary id
    pub intermediary_id: Vec<u8>,
    /// Rotation phase, fixed by the intermediary id
    pub offset: u64,
}

/// A time-boxed pseudonymous id of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ephemeral {
    /// Ephemeral id gateways address notifications to
    pub ephemeral_id: i64,
    /// Epoch the id was rotated in at
    pub epoch: i32,
    /// Identity it was derived from
    pub intermediary_id: Vec<u8>,
}

/// A device to notify, resolved from an ephemeral id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotifyTarget {
    /// Provider-issued token
    pub token: String,
    /// Provider/app tag
    pub app: String,
    /// Owning user's key hash
    pub owner_key_hash: Vec<u8>,
    /// Ephemeral id the notification was addressed to
    pub ephemeral_id: i64,
}

/// Persistence used by the service.
pub trait Storage: Send + Sync + 'static {
    /// Look up a user by key hash.
    fn get_user(&self, key_hash: &[u8]) -> Result<Option<User>, StorageError>;

    /// Insert or replace a user.
    fn upsert_user(&self, user: &User) -> Result<(), StorageError>;

    /// Delete a user with all of their tokens and identity links.
    ///
    /// Returns whether the user existed.
    fn delete_user(&self, key_hash: &[u8]) -> Result<bool, StorageError>;

    /// Insert a token or move an existing one to a new owner/app.
    fn upsert_token(&self, token: &Token) -> Result<(), StorageError>;

    /// Look up a token.
    fn get_token(&self, token: &str) -> Result<Option<Token>, StorageError>;

    /// Delete a token. Returns whether it existed.
    fn delete_token(&self, token: &str) -> Result<bool, StorageError>;

    /// All tokens owned by a user.
    fn tokens_for_user(&self, key_hash: &[u8]) -> Result<Vec<Token>, StorageError>;

    /// Insert an identity if it is not already known.
    fn upsert_identity(&self, identity: &Identity) -> Result<(), StorageError>;

    /// Look up an identity.
    fn get_identity(&self, intermediary_id: &[u8]) -> Result<Option<Identity>, StorageError>;

    /// Link a user to an identity. Linking twice is a no-op.
    fn link_identity(&self, key_hash: &[u8], intermediary_id: &[u8]) -> Result<(), StorageError>;

    /// Remove a user-identity link. Returns whether it existed.
    fn unlink_identity(&self, key_hash: &[u8], intermediary_id: &[u8])
    -> Result<bool, StorageError>;

    /// Users linked to an identity.
    fn users_for_identity(&self, intermediary_id: &[u8]) -> Result<Vec<User>, StorageError>;

    /// Identities in a rotation phase.
    fn identities_for_offset(&self, offset: u64) -> Result<Vec<Identity>, StorageError>;

    /// Insert an ephemeral. Inserting an existing one is a no-op.
    fn upsert_ephemeral(&self, ephemeral: &Ephemeral) -> Result<(), StorageError>;

    /// Ephemerals derived from an identity, oldest first.
    fn ephemerals_for_identity(&self, intermediary_id: &[u8])
    -> Result<Vec<Ephemeral>, StorageError>;

    /// Delete every ephemeral with `epoch < before`. Returns how many went.
    fn delete_ephemerals_before(&self, before: i32) -> Result<usize, StorageError>;

    /// Highest epoch any stored ephemeral was created for.
    fn latest_ephemeral_epoch(&self) -> Result<Option<i32>, StorageError>;

    /// Resolve ephemeral ids to the devices currently registered for them.
    ///
    /// An id nobody claims yields no rows; an id shared by several
    /// identities or users yields one row per distinct (token, id).
    fn get_to_notify(&self, ephemeral_ids: &[i64]) -> Result<Vec<NotifyTarget>, StorageError>;

    /// Read a persisted scalar.
    fn get_state(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a persisted scalar.
    fn upsert_state(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Run `op` against `storage` on tokio's blocking pool.
///
/// # Errors
///
/// Whatever `op` returns, or `Backend` if the blocking task panicked.
pub async fn blocking<S, T, F>(storage: &Arc<S>, op: F) -> Result<T, StorageError>
where
    S: Storage,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || op(&storage))
        .await
        .map_err(|err| StorageError::Backend(format!("storage task failed: {err}")))?
}
