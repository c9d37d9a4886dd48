//! Storage with switchable failures.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use pushgate_core::{
    error::StorageError,
    storage::{Ephemeral, Identity, MemoryStorage, NotifyTarget, Storage, Token, User},
};

/// [`MemoryStorage`] that can be told to fail specific calls.
#[derive(Debug, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_resolution: AtomicBool,
    fail_ephemerals: AtomicBool,
    resolution_held: Mutex<bool>,
    resolution_released: Condvar,
}

/// Longest a held `get_to_notify` waits before failing.
const HOLD_TIMEOUT: Duration = Duration::from_secs(2);

fn injected() -> StorageError {
    StorageError::Backend("injected failure".to_string())
}

impl FlakyStorage {
    /// Healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_to_notify` fail or succeed.
    pub fn fail_resolution(&self, fail: bool) {
        self.fail_resolution.store(fail, Ordering::SeqCst);
    }

    /// Make ephemeral reads and writes fail or succeed.
    pub fn fail_ephemerals(&self, fail: bool) {
        self.fail_ephemerals.store(fail, Ordering::SeqCst);
    }

    /// Make `get_to_notify` block the calling thread until
    /// [`release_resolution`](Self::release_resolution), failing if that does
    /// not happen within two seconds.
    pub fn hold_resolution(&self) {
        *self.resolution_held.lock() = true;
    }

    /// Unblock held `get_to_notify` calls.
    pub fn release_resolution(&self) {
        *self.resolution_held.lock() = false;
        self.resolution_released.notify_all();
    }

    fn wait_for_release(&self) -> Result<(), StorageError> {
        let deadline = Instant::now() + HOLD_TIMEOUT;
        let mut held = self.resolution_held.lock();
        while *held {
            if self.resolution_released.wait_until(&mut held, deadline).timed_out() {
                return Err(StorageError::Backend("resolution was never released".to_string()));
            }
        }
        Ok(())
    }

    /// The wrapped store, bypassing injected failures.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn check_ephemerals(&self) -> Result<(), StorageError> {
        if self.fail_ephemerals.load(Ordering::SeqCst) { Err(injected()) } else { Ok(()) }
    }
}

impl Storage for FlakyStorage {
    fn get_user(&self, key_hash: &[u8]) -> Result<Option<User>, StorageError> {
        self.inner.get_user(key_hash)
    }

    fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.inner.upsert_user(user)
    }

    fn delete_user(&self, key_hash: &[u8]) -> Result<bool, StorageError> {
        self.inner.delete_user(key_hash)
    }

    fn upsert_token(&self, token: &Token) -> Result<(), StorageError> {
        self.inner.upsert_token(token)
    }

    fn get_token(&self, token: &str) -> Result<Option<Token>, StorageError> {
        self.inner.get_token(token)
    }

    fn delete_token(&self, token: &str) -> Result<bool, StorageError> {
        self.inner.delete_token(token)
    }

    fn tokens_for_user(&self, key_hash: &[u8]) -> Result<Vec<Token>, StorageError> {
        self.inner.tokens_for_user(key_hash)
    }

    fn upsert_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        self.inner.upsert_identity(identity)
    }

    fn get_identity(&self, intermediary_id: &[u8]) -> Result<Option<Identity>, StorageError> {
        self.inner.get_identity(intermediary_id)
    }

    fn link_identity(&self, key_hash: &[u8], intermediary_id: &[u8]) -> Result<(), StorageError> {
        self.inner.link_identity(key_hash, intermediary_id)
    }

    fn unlink_identity(
        &self,
        key_hash: &[u8],
        intermediary_id: &[u8],
    ) -> Result<bool, StorageError> {
        self.inner.unlink_identity(key_hash, intermediary_id)
    }

    fn users_for_identity(&self, intermediary_id: &[u8]) -> Result<Vec<User>, StorageError> {
        self.inner.users_for_identity(intermediary_id)
    }

    fn identities_for_offset(&self, offset: u64) -> Result<Vec<Identity>, StorageError> {
        self.check_ephemerals()?;
        self.inner.identities_for_offset(offset)
    }

    fn upsert_ephemeral(&self, ephemeral: &Ephemeral) -> Result<(), StorageError> {
        self.check_ephemerals()?;
        self.inner.upsert_ephemeral(ephemeral)
    }

    fn ephemerals_for_identity(
        &self,
        intermediary_id: &[u8],
    ) -> Result<Vec<Ephemeral>, StorageError> {
        self.inner.ephemerals_for_identity(intermediary_id)
    }

    fn delete_ephemerals_before(&self, before: i32) -> Result<usize, StorageError> {
        self.check_ephemerals()?;
        self.inner.delete_ephemerals_before(before)
    }

    fn latest_ephemeral_epoch(&self) -> Result<Option<i32>, StorageError> {
        self.inner.latest_ephemeral_epoch()
    }

    fn get_to_notify(&self, ephemeral_ids: &[i64]) -> Result<Vec<NotifyTarget>, StorageError> {
        if self.fail_resolution.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.wait_for_release()?;
        self.inner.get_to_notify(ephemeral_ids)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_state(key)
    }

    fn upsert_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.upsert_state(key, value)
    }
}
