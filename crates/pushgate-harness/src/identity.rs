//! Test identities that sign requests the way real clients do.

use ed25519_dalek::{
    Signer, SigningKey, VerifyingKey,
    pkcs8::{EncodePublicKey, spki::der::pem::LineEnding},
};
use pushgate_proto::{
    RegisterForNotificationsRequest, RegisterTokenRequest, RegisterTrackedIdRequest, SignatureTag,
    SigningDigest, UnregisterForNotificationsRequest, UnregisterTokenRequest,
    UnregisterTrackedIdRequest,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn key_from_seed(seed: u64) -> SigningKey {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut secret = [0u8; 32];
    rng.fill_bytes(&mut secret);
    SigningKey::from_bytes(&secret)
}

fn sign(key: &SigningKey, digest: &[u8; 32]) -> Vec<u8> {
    key.sign(digest).to_bytes().to_vec()
}

/// Stand-in for the permissioning service.
#[derive(Debug, Clone)]
pub struct TestPermissioning {
    key: SigningKey,
}

impl TestPermissioning {
    /// Deterministic permissioning key.
    pub fn from_seed(seed: u64) -> Self {
        Self { key: key_from_seed(seed) }
    }

    /// Key the service verifies enrollments with.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Enrollment signature for `user`.
    pub fn enroll(&self, user: &TestUser, registration_timestamp: i64) -> Vec<u8> {
        sign(
            &self.key,
            &SigningDigest::permissioning(registration_timestamp, &user.pem, &user.salt),
        )
    }
}

/// A client with an enrolled transmission key.
#[derive(Debug, Clone)]
pub struct TestUser {
    key: SigningKey,
    /// Transmission public key (PEM)
    pub pem: String,
    /// Enrollment salt
    pub salt: Vec<u8>,
    /// Enrollment time (unix ns)
    pub registration_timestamp: i64,
    /// Permissioning signature over the enrollment
    pub permissioning_sig: Vec<u8>,
}

impl TestUser {
    /// Deterministic user enrolled by `permissioning`.
    #[allow(clippy::expect_used)]
    pub fn new(seed: u64, permissioning: &TestPermissioning) -> Self {
        let key = key_from_seed(seed);
        let pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("ed25519 keys always encode as SPKI PEM");
        let mut user = Self {
            key,
            pem,
            salt: seed.to_be_bytes().to_vec(),
            registration_timestamp: 1_600_000_000_000_000_000,
            permissioning_sig: Vec::new(),
        };
        user.permissioning_sig = permissioning.enroll(&user, user.registration_timestamp);
        user
    }

    /// Sign an arbitrary digest with the transmission key.
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        sign(&self.key, digest)
    }

    /// Legacy registration of `token` for `intermediary_id`.
    pub fn register_for_notifications(
        &self,
        token: &str,
        intermediary_id: &[u8],
    ) -> RegisterForNotificationsRequest {
        RegisterForNotificationsRequest {
            token: token.to_string(),
            intermediary_id: intermediary_id.to_vec(),
            transmission_key_pem: self.pem.clone(),
            transmission_key_salt: self.salt.clone(),
            permissioning_sig: self.permissioning_sig.clone(),
            intermediary_id_sig: self.sign(&SigningDigest::legacy_register(token, intermediary_id)),
            registration_timestamp: self.registration_timestamp,
        }
    }

    /// Legacy unregistration of `intermediary_id`.
    pub fn unregister_for_notifications(
        &self,
        intermediary_id: &[u8],
    ) -> UnregisterForNotificationsRequest {
        UnregisterForNotificationsRequest {
            intermediary_id: intermediary_id.to_vec(),
            intermediary_id_sig: self.sign(&SigningDigest::legacy_unregister(intermediary_id)),
        }
    }

    /// Register `token` under `app`, timestamped `now`.
    pub fn register_token(&self, app: &str, token: &str, now: i64) -> RegisterTokenRequest {
        RegisterTokenRequest {
            app: app.to_string(),
            token: token.to_string(),
            transmission_key_pem: self.pem.clone(),
            transmission_key_salt: self.salt.clone(),
            registration_timestamp: self.registration_timestamp,
            permissioning_sig: self.permissioning_sig.clone(),
            request_timestamp: now,
            token_sig: self.sign(&SigningDigest::token_op(
                SignatureTag::RegisterToken,
                now,
                token,
                app,
            )),
        }
    }

    /// Remove `token`, timestamped `now`.
    pub fn unregister_token(&self, app: &str, token: &str, now: i64) -> UnregisterTokenRequest {
        UnregisterTokenRequest {
            app: app.to_string(),
            token: token.to_string(),
            transmission_key_pem: self.pem.clone(),
            request_timestamp: now,
            token_sig: self.sign(&SigningDigest::token_op(
                SignatureTag::UnregisterToken,
                now,
                token,
                app,
            )),
        }
    }

    /// Track `ids`, timestamped `now`.
    pub fn register_tracked_id(&self, ids: &[Vec<u8>], now: i64) -> RegisterTrackedIdRequest {
        RegisterTrackedIdRequest {
            tracked_ids: ids.to_vec(),
            transmission_key_pem: self.pem.clone(),
            transmission_key_salt: self.salt.clone(),
            registration_timestamp: self.registration_timestamp,
            permissioning_sig: self.permissioning_sig.clone(),
            request_timestamp: now,
            signature: self.sign(&SigningDigest::tracked_id_op(
                SignatureTag::RegisterTrackedId,
                now,
                ids,
            )),
        }
    }

    /// Stop tracking `ids`, timestamped `now`.
    pub fn unregister_tracked_id(&self, ids: &[Vec<u8>], now: i64) -> UnregisterTrackedIdRequest {
        UnregisterTrackedIdRequest {
            tracked_ids: ids.to_vec(),
            transmission_key_pem: self.pem.clone(),
            request_timestamp: now,
            signature: self.sign(&SigningDigest::tracked_id_op(
                SignatureTag::UnregisterTrackedId,
                now,
                ids,
            )),
        }
    }
}
