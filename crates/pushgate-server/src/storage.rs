//! Persistent [`Storage`] on redb.
//!
//! Every trait method runs in one redb transaction, so each call is atomic
//! and readers never see half of a cascade. Relations are kept as multimap
//! tables in both directions where the service walks them both ways.
//!
//! # Key layout
//!
//! Ephemerals are keyed `epoch ‖ ephemeral_id ‖ intermediary_id` with both
//! integers big-endian and sign-flipped, so byte order equals numeric order.
//! Expiry is then a prefix range scan and the newest epoch is the last key.
//! A secondary multimap from ephemeral id to `epoch ‖ intermediary_id`
//! serves the dispatch lookup.

use std::{collections::HashSet, path::Path};

use pushgate_core::{
    StorageError,
    storage::{Ephemeral, Identity, NotifyTarget, Storage, Token, User},
};
use pushgate_proto::codec;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");
const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");
const USER_TOKENS: MultimapTableDefinition<&[u8], &str> =
    MultimapTableDefinition::new("user_tokens");
const IDENTITIES: TableDefinition<&[u8], u64> = TableDefinition::new("identities");
const OFFSET_IDENTITIES: MultimapTableDefinition<u64, &[u8]> =
    MultimapTableDefinition::new("offset_identities");
const IDENTITY_USERS: MultimapTableDefinition<&[u8], &[u8]> =
    MultimapTableDefinition::new("identity_users");
const USER_IDENTITIES: MultimapTableDefinition<&[u8], &[u8]> =
    MultimapTableDefinition::new("user_identities");
const EPHEMERALS: TableDefinition<&[u8], ()> = TableDefinition::new("ephemerals");
const EPHEMERAL_INDEX: MultimapTableDefinition<i64, &[u8]> =
    MultimapTableDefinition::new("ephemeral_index");
const STATE: TableDefinition<&str, &str> = TableDefinition::new("state");

const EPOCH_LEN: usize = 4;
const ID_LEN: usize = 8;

fn backend(err: impl Into<redb::Error>) -> StorageError {
    StorageError::Backend(err.into().to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    codec::encode(value).map(|b| b.to_vec()).map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    codec::decode(bytes).map_err(|e| StorageError::Encoding(e.to_string()))
}

fn epoch_bytes(epoch: i32) -> [u8; EPOCH_LEN] {
    (u32::from_be_bytes(epoch.to_be_bytes()) ^ 0x8000_0000).to_be_bytes()
}

fn epoch_from(bytes: &[u8]) -> Result<i32, StorageError> {
    let raw: [u8; EPOCH_LEN] = bytes
        .get(..EPOCH_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Encoding("truncated ephemeral key".into()))?;
    Ok(i32::from_be_bytes((u32::from_be_bytes(raw) ^ 0x8000_0000).to_be_bytes()))
}

fn ephemeral_key(ephemeral: &Ephemeral) -> Vec<u8> {
    let mut key = Vec::with_capacity(EPOCH_LEN + ID_LEN + ephemeral.intermediary_id.len());
    key.extend_from_slice(&epoch_bytes(ephemeral.epoch));
    let id = u64::from_be_bytes(ephemeral.ephemeral_id.to_be_bytes()) ^ (1 << 63);
    key.extend_from_slice(&id.to_be_bytes());
    key.extend_from_slice(&ephemeral.intermediary_id);
    key
}

fn parse_ephemeral_key(key: &[u8]) -> Result<Ephemeral, StorageError> {
    let epoch = epoch_from(key)?;
    let raw: [u8; ID_LEN] = key
        .get(EPOCH_LEN..EPOCH_LEN + ID_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Encoding("truncated ephemeral key".into()))?;
    Ok(Ephemeral {
        ephemeral_id: i64::from_be_bytes((u64::from_be_bytes(raw) ^ (1 << 63)).to_be_bytes()),
        epoch,
        intermediary_id: key[EPOCH_LEN + ID_LEN..].to_vec(),
    })
}

/// Index entry for an ephemeral: `epoch ‖ intermediary_id`.
fn index_entry(ephemeral: &Ephemeral) -> Vec<u8> {
    let mut entry = epoch_bytes(ephemeral.epoch).to_vec();
    entry.extend_from_slice(&ephemeral.intermediary_id);
    entry
}

/// redb-backed storage.
pub struct RedbStorage {
    db: Database,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open or create a database file and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(USERS).map_err(backend)?;
        txn.open_table(TOKENS).map_err(backend)?;
        txn.open_multimap_table(USER_TOKENS).map_err(backend)?;
        txn.open_table(IDENTITIES).map_err(backend)?;
        txn.open_multimap_table(OFFSET_IDENTITIES).map_err(backend)?;
        txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
        txn.open_multimap_table(USER_IDENTITIES).map_err(backend)?;
        txn.open_table(EPHEMERALS).map_err(backend)?;
        txn.open_multimap_table(EPHEMERAL_INDEX).map_err(backend)?;
        txn.open_table(STATE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        info!(path = %path.display(), "opened redb storage");
        Ok(Self { db })
    }
}

impl Storage for RedbStorage {
    fn get_user(&self, key_hash: &[u8]) -> Result<Option<User>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let users = txn.open_table(USERS).map_err(backend)?;
        users.get(key_hash).map_err(backend)?.map(|v| decode(v.value())).transpose()
    }

    fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        let bytes = encode(user)?;
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut users = txn.open_table(USERS).map_err(backend)?;
            users.insert(user.transmission_key_hash.as_slice(), bytes.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn delete_user(&self, key_hash: &[u8]) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut users = txn.open_table(USERS).map_err(backend)?;
            if users.remove(key_hash).map_err(backend)?.is_none() {
                return Ok(false);
            }

            let mut user_tokens = txn.open_multimap_table(USER_TOKENS).map_err(backend)?;
            let owned = user_tokens
                .remove_all(key_hash)
                .map_err(backend)?
                .map(|v| v.map(|g| g.value().to_owned()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            let mut tokens = txn.open_table(TOKENS).map_err(backend)?;
            for token in &owned {
                tokens.remove(token.as_str()).map_err(backend)?;
            }

            let mut user_identities = txn.open_multimap_table(USER_IDENTITIES).map_err(backend)?;
            let linked = user_identities
                .remove_all(key_hash)
                .map_err(backend)?
                .map(|v| v.map(|g| g.value().to_vec()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            let mut identity_users = txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
            for intermediary_id in &linked {
                identity_users.remove(intermediary_id.as_slice(), key_hash).map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)?;
        Ok(true)
    }

    fn upsert_token(&self, token: &Token) -> Result<(), StorageError> {
        let bytes = encode(token)?;
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut tokens = txn.open_table(TOKENS).map_err(backend)?;
            let mut user_tokens = txn.open_multimap_table(USER_TOKENS).map_err(backend)?;

            let previous: Option<Token> = tokens
                .get(token.token.as_str())
                .map_err(backend)?
                .map(|v| decode(v.value()))
                .transpose()?;
            if let Some(previous) = previous {
                user_tokens
                    .remove(previous.owner.as_slice(), token.token.as_str())
                    .map_err(backend)?;
            }

            tokens.insert(token.token.as_str(), bytes.as_slice()).map_err(backend)?;
            user_tokens.insert(token.owner.as_slice(), token.token.as_str()).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn get_token(&self, token: &str) -> Result<Option<Token>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let tokens = txn.open_table(TOKENS).map_err(backend)?;
        tokens.get(token).map_err(backend)?.map(|v| decode(v.value())).transpose()
    }

    fn delete_token(&self, token: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let existed = {
            let mut tokens = txn.open_table(TOKENS).map_err(backend)?;
            let removed: Option<Token> =
                tokens.remove(token).map_err(backend)?.map(|v| decode(v.value())).transpose()?;
            if let Some(removed) = &removed {
                let mut user_tokens = txn.open_multimap_table(USER_TOKENS).map_err(backend)?;
                user_tokens.remove(removed.owner.as_slice(), token).map_err(backend)?;
            }
            removed.is_some()
        };
        txn.commit().map_err(backend)?;
        Ok(existed)
    }

    fn tokens_for_user(&self, key_hash: &[u8]) -> Result<Vec<Token>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let user_tokens = txn.open_multimap_table(USER_TOKENS).map_err(backend)?;
        let tokens = txn.open_table(TOKENS).map_err(backend)?;

        let mut owned = Vec::new();
        for name in user_tokens.get(key_hash).map_err(backend)? {
            let name = name.map_err(backend)?;
            if let Some(value) = tokens.get(name.value()).map_err(backend)? {
                owned.push(decode(value.value())?);
            }
        }
        Ok(owned)
    }

    fn upsert_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut identities = txn.open_table(IDENTITIES).map_err(backend)?;
            let id = identity.intermediary_id.as_slice();
            if identities.get(id).map_err(backend)?.is_none() {
                identities.insert(id, identity.offset).map_err(backend)?;
                let mut by_offset = txn.open_multimap_table(OFFSET_IDENTITIES).map_err(backend)?;
                by_offset.insert(identity.offset, id).map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)
    }

    fn get_identity(&self, intermediary_id: &[u8]) -> Result<Option<Identity>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let identities = txn.open_table(IDENTITIES).map_err(backend)?;
        Ok(identities.get(intermediary_id).map_err(backend)?.map(|offset| Identity {
            intermediary_id: intermediary_id.to_vec(),
            offset: offset.value(),
        }))
    }

    fn link_identity(&self, key_hash: &[u8], intermediary_id: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let users = txn.open_table(USERS).map_err(backend)?;
            if users.get(key_hash).map_err(backend)?.is_none() {
                return Err(StorageError::MissingReference(format!(
                    "user {}",
                    hex::encode(key_hash)
                )));
            }
            let identities = txn.open_table(IDENTITIES).map_err(backend)?;
            if identities.get(intermediary_id).map_err(backend)?.is_none() {
                return Err(StorageError::MissingReference(format!(
                    "identity {}",
                    hex::encode(intermediary_id)
                )));
            }

            let mut identity_users = txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
            identity_users.insert(intermediary_id, key_hash).map_err(backend)?;
            let mut user_identities = txn.open_multimap_table(USER_IDENTITIES).map_err(backend)?;
            user_identities.insert(key_hash, intermediary_id).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn unlink_identity(
        &self,
        key_hash: &[u8],
        intermediary_id: &[u8],
    ) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let existed = {
            let mut identity_users = txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
            let existed = identity_users.remove(intermediary_id, key_hash).map_err(backend)?;
            let mut user_identities = txn.open_multimap_table(USER_IDENTITIES).map_err(backend)?;
            user_identities.remove(key_hash, intermediary_id).map_err(backend)?;
            existed
        };
        txn.commit().map_err(backend)?;
        Ok(existed)
    }

    fn users_for_identity(&self, intermediary_id: &[u8]) -> Result<Vec<User>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let identity_users = txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
        let users = txn.open_table(USERS).map_err(backend)?;

        let mut linked = Vec::new();
        for key_hash in identity_users.get(intermediary_id).map_err(backend)? {
            let key_hash = key_hash.map_err(backend)?;
            if let Some(value) = users.get(key_hash.value()).map_err(backend)? {
                linked.push(decode(value.value())?);
            }
        }
        Ok(linked)
    }

    fn identities_for_offset(&self, offset: u64) -> Result<Vec<Identity>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let by_offset = txn.open_multimap_table(OFFSET_IDENTITIES).map_err(backend)?;
        by_offset
            .get(offset)
            .map_err(backend)?
            .map(|id| {
                id.map(|id| Identity { intermediary_id: id.value().to_vec(), offset })
                    .map_err(backend)
            })
            .collect()
    }

    fn upsert_ephemeral(&self, ephemeral: &Ephemeral) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut ephemerals = txn.open_table(EPHEMERALS).map_err(backend)?;
            ephemerals.insert(ephemeral_key(ephemeral).as_slice(), ()).map_err(backend)?;
            let mut index = txn.open_multimap_table(EPHEMERAL_INDEX).map_err(backend)?;
            index
                .insert(ephemeral.ephemeral_id, index_entry(ephemeral).as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn ephemerals_for_identity(
        &self,
        intermediary_id: &[u8],
    ) -> Result<Vec<Ephemeral>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let ephemerals = txn.open_table(EPHEMERALS).map_err(backend)?;

        let mut found = Vec::new();
        for entry in ephemerals.iter().map_err(backend)? {
            let (key, _) = entry.map_err(backend)?;
            if key.value().get(EPOCH_LEN + ID_LEN..) == Some(intermediary_id) {
                found.push(parse_ephemeral_key(key.value())?);
            }
        }
        Ok(found)
    }

    fn delete_ephemerals_before(&self, before: i32) -> Result<usize, StorageError> {
        let bound = epoch_bytes(before);
        let txn = self.db.begin_write().map_err(backend)?;
        let removed = {
            let mut ephemerals = txn.open_table(EPHEMERALS).map_err(backend)?;
            let expired = ephemerals
                .range(..bound.as_slice())
                .map_err(backend)?
                .map(|entry| entry.map(|(k, _)| k.value().to_vec()).map_err(backend))
                .collect::<Result<Vec<_>, _>>()?;

            let mut index = txn.open_multimap_table(EPHEMERAL_INDEX).map_err(backend)?;
            for key in &expired {
                let ephemeral = parse_ephemeral_key(key)?;
                ephemerals.remove(key.as_slice()).map_err(backend)?;
                index
                    .remove(ephemeral.ephemeral_id, index_entry(&ephemeral).as_slice())
                    .map_err(backend)?;
            }
            expired.len()
        };
        txn.commit().map_err(backend)?;
        Ok(removed)
    }

    fn latest_ephemeral_epoch(&self) -> Result<Option<i32>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let ephemerals = txn.open_table(EPHEMERALS).map_err(backend)?;
        ephemerals.last().map_err(backend)?.map(|(key, _)| epoch_from(key.value())).transpose()
    }

    fn get_to_notify(&self, ephemeral_ids: &[i64]) -> Result<Vec<NotifyTarget>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let index = txn.open_multimap_table(EPHEMERAL_INDEX).map_err(backend)?;
        let identity_users = txn.open_multimap_table(IDENTITY_USERS).map_err(backend)?;
        let user_tokens = txn.open_multimap_table(USER_TOKENS).map_err(backend)?;
        let tokens = txn.open_table(TOKENS).map_err(backend)?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for &ephemeral_id in ephemeral_ids {
            for entry in index.get(ephemeral_id).map_err(backend)? {
                let entry = entry.map_err(backend)?;
                let Some(intermediary_id) = entry.value().get(EPOCH_LEN..) else {
                    continue;
                };
                for owner in identity_users.get(intermediary_id).map_err(backend)? {
                    let owner = owner.map_err(backend)?;
                    for name in user_tokens.get(owner.value()).map_err(backend)? {
                        let name = name.map_err(backend)?;
                        let Some(value) = tokens.get(name.value()).map_err(backend)? else {
                            continue;
                        };
                        let token: Token = decode(value.value())?;
                        if seen.insert((token.token.clone(), ephemeral_id)) {
                            targets.push(NotifyTarget {
                                token: token.token,
                                app: token.app,
                                owner_key_hash: owner.value().to_vec(),
                                ephemeral_id,
                            });
                        }
                    }
                }
            }
        }
        Ok(targets)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let state = txn.open_table(STATE).map_err(backend)?;
        Ok(state.get(key).map_err(backend)?.map(|v| v.value().to_owned()))
    }

    fn upsert_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut state = txn.open_table(STATE).map_err(backend)?;
            state.insert(key, value).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_keys_sort_by_epoch_then_id() {
        let key = |epoch, ephemeral_id| {
            ephemeral_key(&Ephemeral { ephemeral_id, epoch, intermediary_id: vec![7] })
        };
        let mut keys =
            vec![key(3, 1), key(-2, 5), key(0, -9), key(3, -1), key(i32::MIN, 0), key(i32::MAX, 0)];
        keys.sort();

        let order: Vec<_> = keys
            .iter()
            .map(|k| parse_ephemeral_key(k).unwrap())
            .map(|e| (e.epoch, e.ephemeral_id))
            .collect();
        assert_eq!(order, vec![(i32::MIN, 0), (-2, 5), (0, -9), (3, -1), (3, 1), (i32::MAX, 0)]);
    }

    #[test]
    fn ephemeral_key_parses_back() {
        let ephemeral = Ephemeral { ephemeral_id: -42, epoch: -17, intermediary_id: vec![1, 2, 3] };
        assert_eq!(parse_ephemeral_key(&ephemeral_key(&ephemeral)).unwrap(), ephemeral);
        assert!(parse_ephemeral_key(&[0, 0]).is_err());
    }
}
