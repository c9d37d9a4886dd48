//! Push provider abstraction.
//!
//! A [`Provider`] delivers one encoded payload to one device and classifies
//! failure into two buckets: the token is dead (uninstall, expired
//! registration) and should be pruned, or the failure is transient and the
//! token stays. The sender never retries a transient failure itself; the
//! next round's notifications will reach the device anyway.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::NotifyTarget;

/// Classified delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The provider says the token will never work again
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Anything else; the token is kept
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl NotifyError {
    /// Whether the token should be kept after this failure.
    pub fn token_valid(&self) -> bool {
        !matches!(self, Self::InvalidToken(_))
    }
}

/// A push delivery service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Deliver `payload` to `target`.
    async fn notify(&self, payload: &str, target: &NotifyTarget) -> Result<(), NotifyError>;
}

/// Providers keyed by the app tag tokens are registered with.
///
/// Built once at startup; the app string is only looked at here.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut apps: Vec<_> = self.providers.keys().collect();
        apps.sort();
        f.debug_struct("ProviderRegistry").field("apps", &apps).finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve tokens tagged `app` with `provider`, replacing any previous one.
    pub fn register(&mut self, app: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(app.into(), provider);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, app: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(app, provider);
        self
    }

    /// Provider for `app`.
    pub fn get(&self, app: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(app).cloned()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
