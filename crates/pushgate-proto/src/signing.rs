//! Signing digests.
//!
//! Signatures in pushgate are never computed over raw request bytes. Both
//! sides build a [`SigningDigest`]: SHA-256 over a fixed domain string, the
//! operation's [`SignatureTag`], and then each field length-prefixed so that
//! moving bytes between adjacent fields changes the digest.
//!
//! The tag is what keeps a `RegisterTrackedId` signature from being replayed
//! against `UnregisterTrackedId` with the same identity list.

use sha2::{Digest, Sha256};

/// Domain separator mixed into every digest.
const DOMAIN: &[u8] = b"pushgate/signing/v1";

/// Operation a signature authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignatureTag {
    /// Permissioning enrollment of a transmission key
    Permissioning = 0x01,
    /// Legacy `RegisterForNotifications`
    LegacyRegister = 0x02,
    /// Legacy `UnregisterForNotifications`
    LegacyUnregister = 0x03,
    /// `RegisterToken`
    RegisterToken = 0x10,
    /// `UnregisterToken`
    UnregisterToken = 0x11,
    /// `RegisterTrackedId`
    RegisterTrackedId = 0x12,
    /// `UnregisterTrackedId`
    UnregisterTrackedId = 0x13,
}

impl SignatureTag {
    /// Wire value of the tag.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Incremental builder for a 32-byte signing digest.
#[derive(Clone)]
pub struct SigningDigest {
    hasher: Sha256,
}

impl SigningDigest {
    /// Start a digest for `tag`.
    pub fn new(tag: SignatureTag) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update([tag.to_u8()]);
        Self { hasher }
    }

    /// Mix in a unix-nanosecond timestamp.
    #[must_use]
    pub fn timestamp(mut self, unix_nanos: i64) -> Self {
        self.hasher.update(unix_nanos.to_be_bytes());
        self
    }

    /// Mix in a length-prefixed field.
    #[must_use]
    pub fn field(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Finish and return the digest.
    pub fn finish(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }

    /// Digest the permissioning service signs when enrolling a key.
    pub fn permissioning(registration_timestamp: i64, key_pem: &str, salt: &[u8]) -> [u8; 32] {
        Self::new(SignatureTag::Permissioning)
            .timestamp(registration_timestamp)
            .field(key_pem)
            .field(salt)
            .finish()
    }

    /// Digest for the legacy registration call.
    pub fn legacy_register(token: &str, intermediary_id: &[u8]) -> [u8; 32] {
        Self::new(SignatureTag::LegacyRegister).field(token).field(intermediary_id).finish()
    }

    /// Digest for the legacy unregistration call.
    pub fn legacy_unregister(intermediary_id: &[u8]) -> [u8; 32] {
        Self::new(SignatureTag::LegacyUnregister).field(intermediary_id).finish()
    }

    /// Digest for token registration or removal.
    ///
    /// `tag` is `RegisterToken` or `UnregisterToken`.
    pub fn token_op(tag: SignatureTag, request_timestamp: i64, token: &str, app: &str) -> [u8; 32] {
        Self::new(tag).timestamp(request_timestamp).field(token).field(app).finish()
    }

    /// Digest for tracking or untracking identities.
    ///
    /// `tag` is `RegisterTrackedId` or `UnregisterTrackedId`.
    pub fn tracked_id_op(
        tag: SignatureTag,
        request_timestamp: i64,
        tracked_ids: &[Vec<u8>],
    ) -> [u8; 32] {
        let mut digest =
            Self::new(tag).timestamp(request_timestamp).field((tracked_ids.len() as u64).to_be_bytes());
        for id in tracked_ids {
            digest = digest.field(id);
        }
        digest.finish()
    }
}
