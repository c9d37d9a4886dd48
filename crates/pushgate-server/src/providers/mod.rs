//! HTTP push providers and registry assembly.
//!
//! - [`apns`]: Apple, ES256 provider tokens over HTTP/2
//! - [`fcm`]: Firebase HTTP v1
//! - [`huawei`]: placeholder that never delivers

pub mod apns;
pub mod fcm;
pub mod huawei;

use std::{sync::Arc, time::Duration};

pub use apns::ApnsProvider;
pub use fcm::FcmProvider;
pub use huawei::HuaweiProvider;
use pushgate_core::provider::ProviderRegistry;
use reqwest::Client;
use tracing::{info, warn};

use crate::{config::ServerConfig, error::ServerError};

/// Per-request timeout for provider calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTPS client for every provider.
///
/// # Errors
///
/// `Provider` if the TLS backend cannot be initialised.
pub fn http_client() -> Result<Client, ServerError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ServerError::Provider(e.to_string()))
}

/// Build the app → provider registry from the configured sections.
///
/// # Errors
///
/// Any provider whose credentials cannot be loaded fails startup.
pub fn build_registry(config: &ServerConfig) -> Result<ProviderRegistry, ServerError> {
    let client = http_client()?;
    let mut registry = ProviderRegistry::new();

    if let Some(apns) = &config.apns {
        let provider = ApnsProvider::from_config(client.clone(), apns)?;
        registry.register(apns.app.clone(), Arc::new(provider));
        info!(app = %apns.app, endpoint = %apns.endpoint, "registered APNS provider");
    }
    if let Some(fcm) = &config.fcm {
        let provider = FcmProvider::from_config(client.clone(), fcm)?;
        registry.register(fcm.app.clone(), Arc::new(provider));
        info!(app = %fcm.app, "registered FCM provider");
    }
    if let Some(huawei) = &config.huawei {
        registry.register(huawei.app.clone(), Arc::new(HuaweiProvider));
        info!(app = %huawei.app, "registered Huawei provider");
    }

    if registry.is_empty() {
        warn!("no push providers configured; notifications will be skipped");
    }
    Ok(registry)
}
