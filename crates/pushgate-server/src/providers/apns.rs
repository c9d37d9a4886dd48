//! Apple Push Notification service.
//!
//! Token-based auth: every request carries an ES256 JWT signed with the
//! team's `.p8` key. Apple rejects tokens refreshed more often than every
//! 20 minutes and expires them after 60, so one token is cached and reused
//! for [`TOKEN_LIFETIME`].

use std::time::Duration;

use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD as BASE64URL},
};
use p256::{
    ecdsa::{Signature, SigningKey, signature::Signer},
    pkcs8::DecodePrivateKey,
};
use parking_lot::Mutex;
use pushgate_core::{
    env::{Environment, SystemEnv},
    provider::{NotifyError, Provider},
    storage::NotifyTarget,
};
use pushgate_proto::csv::NOTIFICATION_DATA_KEY;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{config::ApnsConfig, error::ServerError};

/// How long a provider token is reused before a new one is signed.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

/// How long APNS keeps retrying an undelivered notification.
const EXPIRATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Longest `apns-collapse-id` APNS accepts.
const MAX_COLLAPSE_ID: usize = 64;

struct CachedToken {
    jwt: String,
    issued_at: Duration,
}

/// APNS HTTP/2 client.
pub struct ApnsProvider<E = SystemEnv> {
    client: Client,
    env: E,
    endpoint: String,
    topic: String,
    key_id: String,
    team_id: String,
    title: String,
    body: String,
    key: SigningKey,
    token: Mutex<Option<CachedToken>>,
}

impl ApnsProvider<SystemEnv> {
    /// Build from config, reading the signing key from `key_path`.
    ///
    /// # Errors
    ///
    /// - `Io` if the key file cannot be read
    /// - `Key` if it is not a PKCS#8 P-256 key
    pub fn from_config(client: Client, config: &ApnsConfig) -> Result<Self, ServerError> {
        let pem = std::fs::read_to_string(&config.key_path)?;
        Self::new(client, SystemEnv, config, &pem)
    }
}

impl<E: Environment> ApnsProvider<E> {
    /// Build with an explicit clock and PEM key text.
    ///
    /// # Errors
    ///
    /// - `Key` if `key_pem` is not a PKCS#8 P-256 key
    pub fn new(
        client: Client,
        env: E,
        config: &ApnsConfig,
        key_pem: &str,
    ) -> Result<Self, ServerError> {
        let key = SigningKey::from_pkcs8_pem(key_pem)
            .map_err(|e| ServerError::Key(format!("APNS signing key: {e}")))?;

        Ok(Self {
            client,
            env,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            topic: config.topic.clone(),
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
            title: config.title.clone(),
            body: config.body.clone(),
            key,
            token: Mutex::new(None),
        })
    }

    /// Current provider token, signing a fresh one when the cached one is
    /// older than [`TOKEN_LIFETIME`].
    fn provider_token(&self) -> String {
        let now = self.env.unix_time();
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref()
            && now.saturating_sub(token.issued_at) < TOKEN_LIFETIME
        {
            return token.jwt.clone();
        }

        let jwt = self.sign_jwt(now);
        *cached = Some(CachedToken { jwt: jwt.clone(), issued_at: now });
        debug!(key_id = %self.key_id, "signed new APNS provider token");
        jwt
    }

    fn sign_jwt(&self, now: Duration) -> String {
        let header = json!({ "alg": "ES256", "kid": self.key_id });
        let claims = json!({ "iss": self.team_id, "iat": now.as_secs() });
        let input = format!(
            "{}.{}",
            BASE64URL.encode(header.to_string()),
            BASE64URL.encode(claims.to_string())
        );
        let signature: Signature = self.key.sign(input.as_bytes());
        format!("{input}.{}", BASE64URL.encode(signature.to_bytes()))
    }

    fn forget_token(&self) {
        *self.token.lock() = None;
    }
}

/// Collapse id for a user: URL-safe base64 of SHA-256 of the owner's key
/// hash, capped at 64 characters.
pub fn collapse_id(owner_key_hash: &[u8]) -> String {
    let mut id = URL_SAFE.encode(Sha256::digest(owner_key_hash));
    id.truncate(MAX_COLLAPSE_ID);
    id
}

/// Classify a rejected APNS request.
///
/// Only an explicit "this token is gone" answer marks the token invalid;
/// anything else may be our fault or Apple's and leaves the token alone.
pub fn classify_apns_failure(status: u16, reason: &str) -> NotifyError {
    let detail = format!("APNS {status} {reason}");
    match (status, reason) {
        (410, _) | (_, "Unregistered" | "BadDeviceToken") => NotifyError::InvalidToken(detail),
        _ => NotifyError::Transient(detail),
    }
}

#[derive(Deserialize)]
struct ApnsRejection {
    #[serde(default)]
    reason: String,
}

#[async_trait]
impl<E: Environment> Provider for ApnsProvider<E> {
    fn name(&self) -> &'static str {
        "apns"
    }

    async fn notify(&self, payload: &str, target: &NotifyTarget) -> Result<(), NotifyError> {
        let url = format!("{}/3/device/{}", self.endpoint, target.token);
        let expiration = (self.env.unix_time() + EXPIRATION).as_secs();
        let body = json!({
            "aps": {
                "alert": { "title": self.title, "body": self.body },
                "mutable-content": 1,
            },
            NOTIFICATION_DATA_KEY: payload,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.provider_token())
            .header("apns-topic", &self.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .header("apns-expiration", expiration.to_string())
            .header("apns-collapse-id", collapse_id(&target.owner_key_hash))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Transient(format!("APNS request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reason = response
            .json::<ApnsRejection>()
            .await
            .map(|r| r.reason)
            .unwrap_or_default();
        if matches!(reason.as_str(), "ExpiredProviderToken" | "InvalidProviderToken") {
            self.forget_token();
        }
        Err(classify_apns_failure(status.as_u16(), &reason))
    }
}
