//! Registration protocol.
//!
//! Clients bind push tokens and tracked identities to a user, the owner of
//! a transmission key that the permissioning service has enrolled. Every
//! operation is authorized by signatures only:
//!
//! - the **permissioning signature** proves the transmission key was
//!   enrolled (register operations only)
//! - the **operation signature** proves the key holder asked for exactly
//!   this operation; its digest carries a [`SignatureTag`] so a signature
//!   for one operation is useless for another
//!
//! Current operations also carry a request timestamp that must be within
//! [`REQUEST_WINDOW`] of the service clock, which bounds replay.
//!
//! All checks run before the first write, so a rejected request leaves
//! storage untouched.

use std::{sync::Arc, time::Duration};

use ed25519_dalek::{Signature, VerifyingKey, pkcs8::DecodePublicKey};
use pushgate_proto::{
    RegisterForNotificationsRequest, RegisterTokenRequest, RegisterTrackedIdRequest, SignatureTag,
    SigningDigest, UnregisterForNotificationsRequest, UnregisterTokenRequest,
    UnregisterTrackedIdRequest,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    directory::Directory,
    env::{Environment, unix_nanos},
    error::RegistrationError,
    storage::{Ephemeral, Identity, Storage, Token, User},
    time::TimeModel,
};

/// Allowed distance between a request timestamp and the service clock.
pub const REQUEST_WINDOW: Duration = Duration::from_secs(5);

/// Registrar tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarConfig {
    /// Replay window for timestamped requests
    pub request_window: Duration,
    /// How far ahead the scheduler creates ephemerals; registration covers
    /// the same horizon so a new identity is never unreachable in between
    pub creation_lead: Duration,
    /// App tag given to tokens from the legacy register call, which has none
    pub legacy_app: String,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            request_window: REQUEST_WINDOW,
            creation_lead: Duration::from_secs(5 * 60),
            legacy_app: "android".to_string(),
        }
    }
}

/// SHA-256 of a transmission key PEM, the user's primary key.
pub fn key_hash(transmission_key_pem: &str) -> Vec<u8> {
    Sha256::digest(transmission_key_pem.as_bytes()).to_vec()
}

fn parse_key(pem: &str) -> Result<VerifyingKey, RegistrationError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| RegistrationError::InvalidKey(e.to_string()))
}

fn verify(
    key: &VerifyingKey,
    digest: &[u8; 32],
    signature: &[u8],
    what: &'static str,
) -> Result<(), RegistrationError> {
    let signature =
        Signature::from_slice(signature).map_err(|_| RegistrationError::InvalidSignature { what })?;
    key.verify_strict(digest, &signature).map_err(|_| RegistrationError::InvalidSignature { what })
}

/// Handles the registration RPCs.
#[derive(Debug)]
pub struct Registrar<E, S, D> {
    env: E,
    storage: Arc<S>,
    directory: Arc<D>,
    time: TimeModel,
    config: RegistrarConfig,
}

impl<E, S, D> Registrar<E, S, D>
where
    E: Environment,
    S: Storage,
    D: Directory,
{
    /// Create a registrar.
    pub fn new(
        env: E,
        storage: Arc<S>,
        directory: Arc<D>,
        time: TimeModel,
        config: RegistrarConfig,
    ) -> Self {
        Self { env, storage, directory, time, config }
    }

    fn check_window(&self, request_timestamp: i64) -> Result<(), RegistrationError> {
        let now = unix_nanos(self.env.unix_time());
        let skew_nanos = (i128::from(now) - i128::from(request_timestamp)).unsigned_abs();
        let skew = Duration::from_nanos(u64::try_from(skew_nanos).unwrap_or(u64::MAX));

        if skew > self.config.request_window {
            return Err(RegistrationError::StaleRequest { skew, window: self.config.request_window });
        }
        Ok(())
    }

    fn check_permissioning(
        &self,
        registration_timestamp: i64,
        pem: &str,
        salt: &[u8],
        signature: &[u8],
    ) -> Result<(), RegistrationError> {
        let digest = SigningDigest::permissioning(registration_timestamp, pem, salt);
        verify(self.directory.permissioning_key(), &digest, signature, "permissioning")
    }

    /// Insert the user if their key is new. Returns the key hash.
    fn ensure_user(&self, pem: &str, permissioning_sig: &[u8]) -> Result<Vec<u8>, RegistrationError> {
        let hash = key_hash(pem);
        if self.storage.get_user(&hash)?.is_none() {
            self.storage.upsert_user(&User {
                transmission_key_hash: hash.clone(),
                transmission_key_pem: pem.to_string(),
                signature: permissioning_sig.to_vec(),
            })?;
            debug!(user = %hex::encode(&hash[..8]), "created user");
        }
        Ok(hash)
    }

    /// Insert the identity and make it reachable right away.
    ///
    /// Writes the ephemeral for the identity's current rotation and, when the
    /// scheduler's creation horizon already reaches into the next one, that
    /// one too.
    fn ensure_identity(&self, intermediary_id: &[u8]) -> Result<(), RegistrationError> {
        let offset = self.time.offset_of(intermediary_id);
        self.storage.upsert_identity(&Identity { intermediary_id: intermediary_id.to_vec(), offset })?;

        let now = self.env.unix_time();
        let size = self.directory.address_space_size();
        let current = self.time.aligned_epoch(self.time.epoch_at(now), offset);
        let ahead =
            self.time.aligned_epoch(self.time.epoch_at(now + self.config.creation_lead), offset);

        for epoch in [current, ahead] {
            self.storage.upsert_ephemeral(&Ephemeral {
                ephemeral_id: self.time.ephemeral_id(intermediary_id, epoch, size),
                epoch,
                intermediary_id: intermediary_id.to_vec(),
            })?;
        }
        Ok(())
    }

    /// Legacy: register a token for one identity.
    pub fn register_for_notifications(
        &self,
        req: &RegisterForNotificationsRequest,
    ) -> Result<(), RegistrationError> {
        if req.token.is_empty() {
            return Err(RegistrationError::EmptyToken);
        }
        if req.intermediary_id.is_empty() {
            return Err(RegistrationError::EmptyIntermediaryId);
        }
        let key = parse_key(&req.transmission_key_pem)?;
        self.check_permissioning(
            req.registration_timestamp,
            &req.transmission_key_pem,
            &req.transmission_key_salt,
            &req.permissioning_sig,
        )?;
        verify(
            &key,
            &SigningDigest::legacy_register(&req.token, &req.intermediary_id),
            &req.intermediary_id_sig,
            "intermediary id",
        )?;

        let hash = self.ensure_user(&req.transmission_key_pem, &req.permissioning_sig)?;
        self.ensure_identity(&req.intermediary_id)?;
        self.storage.link_identity(&hash, &req.intermediary_id)?;
        self.storage.upsert_token(&Token {
            token: req.token.clone(),
            app: self.config.legacy_app.clone(),
            owner: hash,
        })?;

        info!(app = %self.config.legacy_app, "registered for notifications");
        Ok(())
    }

    /// Legacy: remove the user registered behind an identity.
    ///
    /// Nothing registered is success. An identity shared by several users is
    /// refused, since the signature cannot say which one is asking.
    pub fn unregister_for_notifications(
        &self,
        req: &UnregisterForNotificationsRequest,
    ) -> Result<(), RegistrationError> {
        let users = self.storage.users_for_identity(&req.intermediary_id)?;
        let user = match users.as_slice() {
            [] => return Ok(()),
            [user] => user,
            _ => return Err(RegistrationError::AmbiguousIdentity { users: users.len() }),
        };

        let key = parse_key(&user.transmission_key_pem)?;
        verify(
            &key,
            &SigningDigest::legacy_unregister(&req.intermediary_id),
            &req.intermediary_id_sig,
            "intermediary id",
        )?;

        self.storage.delete_user(&user.transmission_key_hash)?;
        info!("unregistered for notifications");
        Ok(())
    }

    /// Register (or move) a device token.
    pub fn register_token(&self, req: &RegisterTokenRequest) -> Result<(), RegistrationError> {
        if req.token.is_empty() {
            return Err(RegistrationError::EmptyToken);
        }
        if req.app.is_empty() {
            return Err(RegistrationError::EmptyApp);
        }
        self.check_window(req.request_timestamp)?;
        let key = parse_key(&req.transmission_key_pem)?;
        self.check_permissioning(
            req.registration_timestamp,
            &req.transmission_key_pem,
            &req.transmission_key_salt,
            &req.permissioning_sig,
        )?;
        verify(
            &key,
            &SigningDigest::token_op(
                SignatureTag::RegisterToken,
                req.request_timestamp,
                &req.token,
                &req.app,
            ),
            &req.token_sig,
            "token",
        )?;

        let owner = self.ensure_user(&req.transmission_key_pem, &req.permissioning_sig)?;
        self.storage.upsert_token(&Token { token: req.token.clone(), app: req.app.clone(), owner })?;

        info!(app = %req.app, "registered token");
        Ok(())
    }

    /// Track identities for a user.
    pub fn register_tracked_id(&self, req: &RegisterTrackedIdRequest) -> Result<(), RegistrationError> {
        if req.tracked_ids.is_empty() {
            return Err(RegistrationError::NoTrackedIds);
        }
        if req.tracked_ids.iter().any(Vec::is_empty) {
            return Err(RegistrationError::EmptyIntermediaryId);
        }
        self.check_window(req.request_timestamp)?;
        let key = parse_key(&req.transmission_key_pem)?;
        self.check_permissioning(
            req.registration_timestamp,
            &req.transmission_key_pem,
            &req.transmission_key_salt,
            &req.permissioning_sig,
        )?;
        verify(
            &key,
            &SigningDigest::tracked_id_op(
                SignatureTag::RegisterTrackedId,
                req.request_timestamp,
                &req.tracked_ids,
            ),
            &req.signature,
            "tracked id",
        )?;

        let hash = self.ensure_user(&req.transmission_key_pem, &req.permissioning_sig)?;
        for intermediary_id in &req.tracked_ids {
            self.ensure_identity(intermediary_id)?;
            self.storage.link_identity(&hash, intermediary_id)?;
        }

        info!(tracked = req.tracked_ids.len(), "registered tracked ids");
        Ok(())
    }

    /// Remove a device token the caller owns.
    ///
    /// Unknown users and tokens, and tokens owned by someone else, are
    /// success with no effect.
    pub fn unregister_token(&self, req: &UnregisterTokenRequest) -> Result<(), RegistrationError> {
        if req.token.is_empty() {
            return Err(RegistrationError::EmptyToken);
        }
        self.check_window(req.request_timestamp)?;
        let key = parse_key(&req.transmission_key_pem)?;
        verify(
            &key,
            &SigningDigest::token_op(
                SignatureTag::UnregisterToken,
                req.request_timestamp,
                &req.token,
                &req.app,
            ),
            &req.token_sig,
            "token",
        )?;

        let hash = key_hash(&req.transmission_key_pem);
        if self.storage.get_user(&hash)?.is_none() {
            return Ok(());
        }
        match self.storage.get_token(&req.token)? {
            Some(token) if token.owner == hash => {
                self.storage.delete_token(&req.token)?;
                info!(app = %token.app, "unregistered token");
            },
            Some(_) => debug!("token owned by another user, ignoring unregister"),
            None => {},
        }
        Ok(())
    }

    /// Stop tracking identities for a user. Unknown links are ignored.
    pub fn unregister_tracked_id(
        &self,
        req: &UnregisterTrackedIdRequest,
    ) -> Result<(), RegistrationError> {
        if req.tracked_ids.is_empty() {
            return Err(RegistrationError::NoTrackedIds);
        }
        self.check_window(req.request_timestamp)?;
        let key = parse_key(&req.transmission_key_pem)?;
        verify(
            &key,
            &SigningDigest::tracked_id_op(
                SignatureTag::UnregisterTrackedId,
                req.request_timestamp,
                &req.tracked_ids,
            ),
            &req.signature,
            "tracked id",
        )?;

        let hash = key_hash(&req.transmission_key_pem);
        let mut removed = 0;
        for intermediary_id in &req.tracked_ids {
            if self.storage.unlink_identity(&hash, intermediary_id)? {
                removed += 1;
            }
        }

        info!(removed, "unregistered tracked ids");
        Ok(())
    }
}
