//! Network directory state.
//!
//! The permissioning service vouches for user keys and the network decides
//! how many bits ephemeral ids carry. Both come from outside the service;
//! [`Directory`] is how the core reads them.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use ed25519_dalek::VerifyingKey;
use tracing::info;

use crate::{error::StorageError, storage::Storage};

/// State key the address-space size is persisted under.
pub const ADDRESS_SPACE_STATE_KEY: &str = "address_space_size";

/// Default ephemeral id width in bits.
pub const DEFAULT_ADDRESS_SPACE_SIZE: u8 = 16;

/// Values the service takes from the network directory.
pub trait Directory: Send + Sync + 'static {
    /// Key the permissioning service signs user enrollments with.
    fn permissioning_key(&self) -> &VerifyingKey;

    /// Current ephemeral id width in bits.
    fn address_space_size(&self) -> u8;
}

/// Directory state held by the service and kept in storage across restarts.
#[derive(Debug)]
pub struct NetworkState<S> {
    permissioning_key: VerifyingKey,
    address_space_size: AtomicU8,
    storage: Arc<S>,
}

impl<S: Storage> NetworkState<S> {
    /// Restore state, preferring a persisted address-space size over
    /// `default_size`.
    ///
    /// An unparseable persisted value is ignored.
    pub fn restore(
        permissioning_key: VerifyingKey,
        default_size: u8,
        storage: Arc<S>,
    ) -> Result<Self, StorageError> {
        let size = match storage.get_state(ADDRESS_SPACE_STATE_KEY)? {
            Some(stored) => stored.parse().unwrap_or(default_size),
            None => default_size,
        };

        Ok(Self { permissioning_key, address_space_size: AtomicU8::new(size), storage })
    }

    /// Record a new address-space size reported by the network.
    ///
    /// Pushgate does not poll the network itself; this is the entry point
    /// for whatever process follows the network directory. Until it is
    /// called, the size is the persisted one or the configured default.
    pub fn update_address_space_size(&self, size: u8) -> Result<(), StorageError> {
        self.storage.upsert_state(ADDRESS_SPACE_STATE_KEY, &size.to_string())?;
        let previous = self.address_space_size.swap(size, Ordering::SeqCst);
        if previous != size {
            info!(previous, size, "address space size changed");
        }
        Ok(())
    }
}

impl<S: Storage> Directory for NetworkState<S> {
    fn permissioning_key(&self) -> &VerifyingKey {
        &self.permissioning_key
    }

    fn address_space_size(&self) -> u8 {
        self.address_space_size.load(Ordering::SeqCst)
    }
}
