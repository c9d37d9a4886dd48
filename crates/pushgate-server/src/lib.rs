//! Pushgate server.
//!
//! Production edges around [`pushgate_core`]: a redb [`Storage`]
//! implementation, HTTPS push providers, the framed TCP listener and the
//! TOML configuration that wires them together. The `pushgate-server` binary
//! is a thin shell over [`run`].
//!
//! [`Storage`]: pushgate_core::Storage

pub mod config;
pub mod error;
pub mod listener;
pub mod providers;
pub mod storage;

use std::sync::Arc;

pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
use ed25519_dalek::{VerifyingKey, pkcs8::DecodePublicKey};
pub use listener::Listener;
use pushgate_core::{
    Environment, MemoryStorage, NetworkState, NotificationService, Storage, SystemEnv,
};
pub use storage::RedbStorage;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Parse the permissioning service's public key.
///
/// # Errors
///
/// `Key` if the PEM is not an Ed25519 SPKI key.
pub fn permissioning_key(pem: &str) -> Result<VerifyingKey, ServerError> {
    VerifyingKey::from_public_key_pem(pem)
        .map_err(|e| ServerError::Key(format!("permissioning key: {e}")))
}

/// Open the configured storage and serve until `shutdown` fires.
///
/// # Errors
///
/// Fails if storage, keys or providers cannot be set up or the listen
/// address cannot be bound.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    match &config.storage.path {
        Some(path) => {
            let storage = Arc::new(RedbStorage::open(path)?);
            serve(SystemEnv, storage, &config, shutdown).await
        },
        None => {
            info!("no storage path configured, using in-memory storage");
            serve(SystemEnv, Arc::new(MemoryStorage::new()), &config, shutdown).await
        },
    }
}

async fn serve<E: Environment, S: Storage>(
    env: E,
    storage: Arc<S>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let key = permissioning_key(&config.directory.permissioning_key_pem)?;
    let directory = Arc::new(NetworkState::restore(
        key,
        config.directory.address_space_size,
        Arc::clone(&storage),
    )?);
    let providers = providers::build_registry(config)?;

    let service = Arc::new(NotificationService::new(
        env,
        storage,
        directory,
        providers,
        config.service_config(),
    ));
    let socket = TcpListener::bind(config.listen_addr).await?;
    let handle = service.start();

    Listener::new(Arc::clone(&service), config.gateways.trusted.iter().copied())
        .serve(socket, shutdown)
        .await;

    info!("shutting down background tasks");
    handle.stop().await;
    Ok(())
}
