//! Firebase Cloud Messaging (HTTP v1).
//!
//! Requests carry an OAuth access token as a bearer credential. Those tokens
//! expire after about an hour, so an external refresher rewrites the
//! credential file and the provider re-reads it once the cached copy is older
//! than its refresh interval, or as soon as FCM rejects it.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use pushgate_core::{
    env::{Environment, SystemEnv},
    provider::{NotifyError, Provider},
    storage::NotifyTarget,
};
use pushgate_proto::csv::NOTIFICATION_DATA_KEY;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::{config::FcmConfig, error::ServerError};

/// Time-to-live FCM keeps an undelivered message for (7 days).
const MESSAGE_TTL: &str = "604800s";

struct CachedCredential {
    value: String,
    loaded_at: Duration,
}

/// FCM `messages:send` client.
pub struct FcmProvider<E = SystemEnv> {
    client: Client,
    env: E,
    endpoint: String,
    /// Where the credential is reloaded from; `None` for a fixed credential
    credential_path: Option<PathBuf>,
    refresh: Duration,
    credential: Mutex<Option<CachedCredential>>,
}

fn parse_credential(text: &str, path: &Path) -> Result<String, ServerError> {
    let credential = text.trim();
    if credential.is_empty() {
        return Err(ServerError::Key(format!("FCM credential file {} is empty", path.display())));
    }
    Ok(credential.to_owned())
}

impl FcmProvider<SystemEnv> {
    /// Build a client posting to `endpoint` with a fixed bearer `credential`.
    pub fn new(client: Client, endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            client,
            env: SystemEnv,
            endpoint: endpoint.into(),
            credential_path: None,
            refresh: Duration::MAX,
            credential: Mutex::new(Some(CachedCredential {
                value: credential.into(),
                loaded_at: Duration::ZERO,
            })),
        }
    }

    /// Build from config, reading the credential from `credential_path`.
    ///
    /// # Errors
    ///
    /// - `Io` if the credential file cannot be read
    /// - `Key` if it is empty
    pub fn from_config(client: Client, config: &FcmConfig) -> Result<Self, ServerError> {
        Self::from_file(
            client,
            SystemEnv,
            config.endpoint.clone(),
            config.credential_path.clone(),
            Duration::from_secs(config.credential_refresh_secs),
        )
    }
}

impl<E: Environment> FcmProvider<E> {
    /// Build a client whose credential is read from `path` now and re-read
    /// every `refresh`.
    ///
    /// # Errors
    ///
    /// - `Io` if the credential file cannot be read
    /// - `Key` if it is empty
    pub fn from_file(
        client: Client,
        env: E,
        endpoint: impl Into<String>,
        path: PathBuf,
        refresh: Duration,
    ) -> Result<Self, ServerError> {
        let value = parse_credential(&std::fs::read_to_string(&path)?, &path)?;
        let loaded_at = env.unix_time();
        Ok(Self {
            client,
            env,
            endpoint: endpoint.into(),
            credential_path: Some(path),
            refresh,
            credential: Mutex::new(Some(CachedCredential { value, loaded_at })),
        })
    }

    /// Current bearer credential, reloading it from disk when the cached
    /// copy is stale or was dropped.
    ///
    /// A failed reload keeps using a stale copy rather than stopping
    /// delivery.
    async fn bearer(&self) -> Result<String, NotifyError> {
        let now = self.env.unix_time();
        let stale = {
            let guard = self.credential.lock();
            match (guard.as_ref(), &self.credential_path) {
                (Some(cached), None) => return Ok(cached.value.clone()),
                (Some(cached), Some(_)) if now.saturating_sub(cached.loaded_at) < self.refresh => {
                    return Ok(cached.value.clone());
                },
                (cached, _) => cached.map(|c| c.value.clone()),
            }
        };

        let Some(path) = &self.credential_path else {
            return Err(NotifyError::Transient("FCM credential missing".into()));
        };

        let reloaded = match tokio::fs::read_to_string(path).await {
            Ok(text) => parse_credential(&text, path),
            Err(err) => Err(err.into()),
        };
        match reloaded {
            Ok(value) => {
                *self.credential.lock() =
                    Some(CachedCredential { value: value.clone(), loaded_at: now });
                debug!(path = %path.display(), "reloaded FCM credential");
                Ok(value)
            },
            Err(err) => match stale {
                Some(value) => {
                    warn!(error = %err, "reloading FCM credential failed, keeping previous one");
                    Ok(value)
                },
                None => Err(NotifyError::Transient(format!("FCM credential unavailable: {err}"))),
            },
        }
    }

    /// Drop a credential FCM refused so the next send reloads it.
    fn forget_credential(&self) {
        if self.credential_path.is_some() {
            *self.credential.lock() = None;
        }
    }
}

/// Classify a rejected FCM request.
///
/// A 404 means the registration no longer exists; FCM also reports an
/// unknown token as a 400 mentioning an invalid registration. Everything
/// else leaves the token in place.
pub fn classify_fcm_failure(status: u16, body: &str) -> NotifyError {
    let detail = format!("FCM {status}: {body}");
    let unregistered = status == 404
        || (status == 400 && body.to_ascii_lowercase().contains("invalid registration"));
    if unregistered { NotifyError::InvalidToken(detail) } else { NotifyError::Transient(detail) }
}

#[async_trait]
impl<E: Environment> Provider for FcmProvider<E> {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn notify(&self, payload: &str, target: &NotifyTarget) -> Result<(), NotifyError> {
        let message = json!({
            "message": {
                "token": target.token,
                "data": { NOTIFICATION_DATA_KEY: payload },
                "android": { "priority": "high", "ttl": MESSAGE_TTL },
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.bearer().await?)
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Transient(format!("FCM request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            self.forget_credential();
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_fcm_failure(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_invalid() {
        assert!(!classify_fcm_failure(404, "Requested entity was not found.").token_valid());
    }

    #[test]
    fn invalid_registration_is_matched_case_insensitively() {
        assert!(!classify_fcm_failure(400, "Invalid Registration token").token_valid());
        assert!(!classify_fcm_failure(400, "error: INVALID REGISTRATION").token_valid());
        assert!(classify_fcm_failure(400, "invalid argument").token_valid());
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [401, 403, 429, 500, 503] {
            assert!(classify_fcm_failure(status, "invalid registration").token_valid());
        }
    }
}
