//! In-memory storage.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use super::{Ephemeral, Identity, NotifyTarget, Storage, Token, User};
use crate::error::StorageError;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Vec<u8>, User>,
    tokens: HashMap<String, Token>,
    tokens_by_owner: HashMap<Vec<u8>, BTreeSet<String>>,
    identities: HashMap<Vec<u8>, Identity>,
    identities_by_offset: HashMap<u64, BTreeSet<Vec<u8>>>,
    users_by_identity: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    identities_by_user: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    /// Ordered by epoch first so expiry is a range split
    ephemerals: BTreeSet<(i32, i64, Vec<u8>)>,
    ephemerals_by_id: HashMap<i64, BTreeSet<(i32, Vec<u8>)>>,
    state: BTreeMap<String, String>,
}

impl Tables {
    fn remove_token(&mut self, token: &str) -> bool {
        let Some(old) = self.tokens.remove(token) else {
            return false;
        };
        if let Some(owned) = self.tokens_by_owner.get_mut(&old.owner) {
            owned.remove(token);
            if owned.is_empty() {
                self.tokens_by_owner.remove(&old.owner);
            }
        }
        true
    }

    fn remove_link(&mut self, key_hash: &[u8], intermediary_id: &[u8]) -> bool {
        let mut existed = false;
        if let Some(users) = self.users_by_identity.get_mut(intermediary_id) {
            existed = users.remove(key_hash);
            if users.is_empty() {
                self.users_by_identity.remove(intermediary_id);
            }
        }
        if let Some(ids) = self.identities_by_user.get_mut(key_hash) {
            ids.remove(intermediary_id);
            if ids.is_empty() {
                self.identities_by_user.remove(key_hash);
            }
        }
        existed
    }
}

/// Storage held entirely in memory.
///
/// Used by tests and by deployments that accept losing the registry on
/// restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ephemerals.
    pub fn ephemeral_count(&self) -> usize {
        self.tables.read().ephemerals.len()
    }
}

impl Storage for MemoryStorage {
    fn get_user(&self, key_hash: &[u8]) -> Result<Option<User>, StorageError> {
        Ok(self.tables.read().users.get(key_hash).cloned())
    }

    fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.tables.write().users.insert(user.transmission_key_hash.clone(), user.clone());
        Ok(())
    }

    fn delete_user(&self, key_hash: &[u8]) -> Result<bool, StorageError> {
        let mut tables = self.tables.write();
        if tables.users.remove(key_hash).is_none() {
            return Ok(false);
        }

        let tokens = tables.tokens_by_owner.remove(key_hash).unwrap_or_default();
        for token in tokens {
            tables.tokens.remove(&token);
        }

        let identities = tables.identities_by_user.get(key_hash).cloned().unwrap_or_default();
        for intermediary_id in identities {
            tables.remove_link(key_hash, &intermediary_id);
        }

        Ok(true)
    }

    fn upsert_token(&self, token: &Token) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.remove_token(&token.token);
        tables.tokens_by_owner.entry(token.owner.clone()).or_default().insert(token.token.clone());
        tables.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    fn get_token(&self, token: &str) -> Result<Option<Token>, StorageError> {
        Ok(self.tables.read().tokens.get(token).cloned())
    }

    fn delete_token(&self, token: &str) -> Result<bool, StorageError> {
        Ok(self.tables.write().remove_token(token))
    }

    fn tokens_for_user(&self, key_hash: &[u8]) -> Result<Vec<Token>, StorageError> {
        let tables = self.tables.read();
        let Some(owned) = tables.tokens_by_owner.get(key_hash) else {
            return Ok(Vec::new());
        };
        Ok(owned.iter().filter_map(|t| tables.tokens.get(t).cloned()).collect())
    }

    fn upsert_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if tables.identities.contains_key(&identity.intermediary_id) {
            return Ok(());
        }
        tables
            .identities_by_offset
            .entry(identity.offset)
            .or_default()
            .insert(identity.intermediary_id.clone());
        tables.identities.insert(identity.intermediary_id.clone(), identity.clone());
        Ok(())
    }

    fn get_identity(&self, intermediary_id: &[u8]) -> Result<Option<Identity>, StorageError> {
        Ok(self.tables.read().identities.get(intermediary_id).cloned())
    }

    fn link_identity(&self, key_hash: &[u8], intermediary_id: &[u8]) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(key_hash) {
            return Err(StorageError::MissingReference(format!(
                "user {}",
                hex::encode(key_hash)
            )));
        }
        if !tables.identities.contains_key(intermediary_id) {
            return Err(StorageError::MissingReference(format!(
                "identity {}",
                hex::encode(intermediary_id)
            )));
        }
        tables
            .users_by_identity
            .entry(intermediary_id.to_vec())
            .or_default()
            .insert(key_hash.to_vec());
        tables
            .identities_by_user
            .entry(key_hash.to_vec())
            .or_default()
            .insert(intermediary_id.to_vec());
        Ok(())
    }

    fn unlink_identity(
        &self,
        key_hash: &[u8],
        intermediary_id: &[u8],
    ) -> Result<bool, StorageError> {
        Ok(self.tables.write().remove_link(key_hash, intermediary_id))
    }

    fn users_for_identity(&self, intermediary_id: &[u8]) -> Result<Vec<User>, StorageError> {
        let tables = self.tables.read();
        let Some(users) = tables.users_by_identity.get(intermediary_id) else {
            return Ok(Vec::new());
        };
        Ok(users.iter().filter_map(|u| tables.users.get(u).cloned()).collect())
    }

    fn identities_for_offset(&self, offset: u64) -> Result<Vec<Identity>, StorageError> {
        let tables = self.tables.read();
        let Some(ids) = tables.identities_by_offset.get(&offset) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| tables.identities.get(id).cloned()).collect())
    }

    fn upsert_ephemeral(&self, ephemeral: &Ephemeral) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let inserted = tables.ephemerals.insert((
            ephemeral.epoch,
            ephemeral.ephemeral_id,
            ephemeral.intermediary_id.clone(),
        ));
        if inserted {
            tables
                .ephemerals_by_id
                .entry(ephemeral.ephemeral_id)
                .or_default()
                .insert((ephemeral.epoch, ephemeral.intermediary_id.clone()));
        }
        Ok(())
    }

    fn ephemerals_for_identity(
        &self,
        intermediary_id: &[u8],
    ) -> Result<Vec<Ephemeral>, StorageError> {
        Ok(self
            .tables
            .read()
            .ephemerals
            .iter()
            .filter(|(_, _, id)| id.as_slice() == intermediary_id)
            .map(|(epoch, ephemeral_id, id)| Ephemeral {
                ephemeral_id: *ephemeral_id,
                epoch: *epoch,
                intermediary_id: id.clone(),
            })
            .collect())
    }

    fn delete_ephemerals_before(&self, before: i32) -> Result<usize, StorageError> {
        let mut tables = self.tables.write();
        let keep = tables.ephemerals.split_off(&(before, i64::MIN, Vec::new()));
        let expired = std::mem::replace(&mut tables.ephemerals, keep);

        for (epoch, ephemeral_id, intermediary_id) in &expired {
            if let Some(entries) = tables.ephemerals_by_id.get_mut(ephemeral_id) {
                entries.remove(&(*epoch, intermediary_id.clone()));
                if entries.is_empty() {
                    tables.ephemerals_by_id.remove(ephemeral_id);
                }
            }
        }

        Ok(expired.len())
    }

    fn latest_ephemeral_epoch(&self) -> Result<Option<i32>, StorageError> {
        Ok(self.tables.read().ephemerals.last().map(|(epoch, _, _)| *epoch))
    }

    fn get_to_notify(&self, ephemeral_ids: &[i64]) -> Result<Vec<NotifyTarget>, StorageError> {
        let tables = self.tables.read();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for ephemeral_id in ephemeral_ids {
            let Some(entries) = tables.ephemerals_by_id.get(ephemeral_id) else {
                continue;
            };
            for (_, intermediary_id) in entries {
                let Some(users) = tables.users_by_identity.get(intermediary_id) else {
                    continue;
                };
                for owner in users {
                    let Some(owned) = tables.tokens_by_owner.get(owner) else {
                        continue;
                    };
                    for token in owned.iter().filter_map(|t| tables.tokens.get(t)) {
                        if seen.insert((token.token.clone(), *ephemeral_id)) {
                            targets.push(NotifyTarget {
                                token: token.token.clone(),
                                app: token.app.clone(),
                                owner_key_hash: owner.clone(),
                                ephemeral_id: *ephemeral_id,
                            });
                        }
                    }
                }
            }
        }

        Ok(targets)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.tables.read().state.get(key).cloned())
    }

    fn upsert_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.tables.write().state.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
