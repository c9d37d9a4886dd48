//! redb storage tests.
//!
//! The in-memory store is the reference model: any sequence of operations
//! applied to both must leave them answering every query the same way.

use std::{collections::BTreeSet, path::Path, sync::Arc};

use proptest::prelude::*;
use pushgate_core::{
    StorageError,
    directory::{ADDRESS_SPACE_STATE_KEY, Directory, NetworkState},
    storage::{Ephemeral, Identity, MemoryStorage, Storage, Token, User},
};
use pushgate_harness::TestPermissioning;
use pushgate_server::RedbStorage;

fn open(dir: &Path) -> RedbStorage {
    RedbStorage::open(&dir.join("pushgate.redb")).unwrap()
}

fn user(n: u8) -> User {
    User {
        transmission_key_hash: vec![n; 32],
        transmission_key_pem: format!("pem-{n}"),
        signature: vec![n; 64],
    }
}

fn identity(n: u8, offset: u64) -> Identity {
    Identity { intermediary_id: vec![n; 33], offset }
}

fn seed_chain(storage: &impl Storage) {
    storage.upsert_user(&user(1)).unwrap();
    storage.upsert_identity(&identity(9, 3)).unwrap();
    storage.link_identity(&user(1).transmission_key_hash, &[9; 33]).unwrap();
    storage
        .upsert_token(&Token { token: "phone".into(), app: "ios".into(), owner: vec![1; 32] })
        .unwrap();
    storage
        .upsert_ephemeral(&Ephemeral { ephemeral_id: -5, epoch: 40, intermediary_id: vec![9; 33] })
        .unwrap();
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = open(dir.path());
        seed_chain(&storage);
        storage.upsert_state("k", "v").unwrap();
    }

    let storage = open(dir.path());
    assert_eq!(storage.get_user(&[1; 32]).unwrap(), Some(user(1)));
    assert_eq!(storage.get_identity(&[9; 33]).unwrap(), Some(identity(9, 3)));
    assert_eq!(storage.get_state("k").unwrap().as_deref(), Some("v"));
    assert_eq!(storage.latest_ephemeral_epoch().unwrap(), Some(40));

    let targets = storage.get_to_notify(&[-5]).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].token, "phone");
    assert_eq!(targets[0].owner_key_hash, vec![1; 32]);
}

#[test]
fn link_requires_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path());
    storage.upsert_user(&user(1)).unwrap();

    assert!(matches!(
        storage.link_identity(&[1; 32], &[9; 33]),
        Err(StorageError::MissingReference(_))
    ));
    assert!(matches!(
        storage.link_identity(&[2; 32], &[9; 33]),
        Err(StorageError::MissingReference(_))
    ));
}

#[test]
fn deleting_user_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path());
    seed_chain(&storage);

    assert!(storage.delete_user(&[1; 32]).unwrap());
    assert!(!storage.delete_user(&[1; 32]).unwrap());

    assert!(storage.get_token("phone").unwrap().is_none());
    assert!(storage.users_for_identity(&[9; 33]).unwrap().is_empty());
    assert!(storage.get_to_notify(&[-5]).unwrap().is_empty());
    // Identity and its ephemerals outlive the user
    assert!(storage.get_identity(&[9; 33]).unwrap().is_some());
    assert_eq!(storage.ephemerals_for_identity(&[9; 33]).unwrap().len(), 1);
}

#[test]
fn expiry_handles_negative_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path());
    for epoch in [-3, -1, 0, 2, 5] {
        storage
            .upsert_ephemeral(&Ephemeral {
                ephemeral_id: i64::from(epoch) * 10,
                epoch,
                intermediary_id: vec![1],
            })
            .unwrap();
    }

    assert_eq!(storage.delete_ephemerals_before(0).unwrap(), 2);
    let left: Vec<_> =
        storage.ephemerals_for_identity(&[1]).unwrap().iter().map(|e| e.epoch).collect();
    assert_eq!(left, vec![0, 2, 5]);
    assert!(storage.get_to_notify(&[-30, -10]).unwrap().is_empty());
    assert_eq!(storage.latest_ephemeral_epoch().unwrap(), Some(5));
}

#[test]
fn address_space_size_persists() {
    let dir = tempfile::tempdir().unwrap();
    let key = TestPermissioning::from_seed(3).verifying_key();
    {
        let storage = Arc::new(open(dir.path()));
        let state = NetworkState::restore(key, 16, storage).unwrap();
        state.update_address_space_size(20).unwrap();
    }

    let storage = Arc::new(open(dir.path()));
    assert_eq!(storage.get_state(ADDRESS_SPACE_STATE_KEY).unwrap().as_deref(), Some("20"));
    let state = NetworkState::restore(key, 16, storage).unwrap();
    assert_eq!(state.address_space_size(), 20);
}

#[derive(Debug, Clone)]
enum Op {
    UpsertUser(u8),
    DeleteUser(u8),
    UpsertToken(u8, u8),
    DeleteToken(u8),
    UpsertIdentity(u8, u64),
    Link(u8, u8),
    Unlink(u8, u8),
    UpsertEphemeral(i64, i32, u8),
    DeleteBefore(i32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::UpsertUser),
        (0u8..4).prop_map(Op::DeleteUser),
        (0u8..6, 0u8..4).prop_map(|(t, u)| Op::UpsertToken(t, u)),
        (0u8..6).prop_map(Op::DeleteToken),
        (0u8..4, 0u64..3).prop_map(|(i, o)| Op::UpsertIdentity(i, o)),
        (0u8..4, 0u8..4).prop_map(|(u, i)| Op::Link(u, i)),
        (0u8..4, 0u8..4).prop_map(|(u, i)| Op::Unlink(u, i)),
        (-4i64..4, -3i32..6, 0u8..4).prop_map(|(id, e, i)| Op::UpsertEphemeral(id, e, i)),
        (-3i32..6).prop_map(Op::DeleteBefore),
    ]
}

/// Apply an op, returning a comparable summary of its result.
fn apply(storage: &impl Storage, op: &Op) -> String {
    let result = match op {
        Op::UpsertUser(u) => storage.upsert_user(&user(*u)).map(|()| String::new()),
        Op::DeleteUser(u) => storage.delete_user(&[*u; 32]).map(|b| b.to_string()),
        Op::UpsertToken(t, u) => {
            let token = Token { token: format!("t{t}"), app: "ios".into(), owner: vec![*u; 32] };
            storage.upsert_token(&token).map(|()| String::new())
        },
        Op::DeleteToken(t) => storage.delete_token(&format!("t{t}")).map(|b| b.to_string()),
        Op::UpsertIdentity(i, o) => {
            storage.upsert_identity(&identity(*i, *o)).map(|()| String::new())
        },
        Op::Link(u, i) => storage.link_identity(&[*u; 32], &[*i; 33]).map(|()| String::new()),
        Op::Unlink(u, i) => storage.unlink_identity(&[*u; 32], &[*i; 33]).map(|b| b.to_string()),
        Op::UpsertEphemeral(id, epoch, i) => storage
            .upsert_ephemeral(&Ephemeral {
                ephemeral_id: *id,
                epoch: *epoch,
                intermediary_id: vec![*i; 33],
            })
            .map(|()| String::new()),
        Op::DeleteBefore(epoch) => storage.delete_ephemerals_before(*epoch).map(|n| n.to_string()),
    };
    match result {
        Ok(summary) => summary,
        Err(StorageError::MissingReference(_)) => "missing".into(),
        Err(err) => format!("error: {err}"),
    }
}

/// Everything observable through the trait, in a canonical order.
fn snapshot(storage: &impl Storage) -> Vec<String> {
    let mut out = Vec::new();
    for n in 0u8..4 {
        out.push(format!("user {n}: {:?}", storage.get_user(&[n; 32]).unwrap()));
        let tokens: BTreeSet<_> =
            storage.tokens_for_user(&[n; 32]).unwrap().into_iter().map(|t| t.token).collect();
        out.push(format!("tokens {n}: {tokens:?}"));
        out.push(format!("identity {n}: {:?}", storage.get_identity(&[n; 33]).unwrap()));
        let users: BTreeSet<_> = storage
            .users_for_identity(&[n; 33])
            .unwrap()
            .into_iter()
            .map(|u| u.transmission_key_hash)
            .collect();
        out.push(format!("users of {n}: {users:?}"));
        let ephemerals = storage.ephemerals_for_identity(&[n; 33]).unwrap();
        out.push(format!("ephemerals {n}: {ephemerals:?}"));
    }
    for offset in 0u64..3 {
        let ids: BTreeSet<_> = storage
            .identities_for_offset(offset)
            .unwrap()
            .into_iter()
            .map(|i| i.intermediary_id)
            .collect();
        out.push(format!("offset {offset}: {ids:?}"));
    }
    let targets: BTreeSet<_> = storage
        .get_to_notify(&[-4, -3, -2, -1, 0, 1, 2, 3])
        .unwrap()
        .into_iter()
        .map(|t| (t.token, t.app, t.owner_key_hash, t.ephemeral_id))
        .collect();
    out.push(format!("targets: {targets:?}"));
    out.push(format!("latest: {:?}", storage.latest_ephemeral_epoch().unwrap()));
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn redb_matches_memory_model(ops in prop::collection::vec(op(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let redb = open(dir.path());
        let model = MemoryStorage::new();

        for op in &ops {
            prop_assert_eq!(apply(&redb, op), apply(&model, op), "op {:?}", op);
        }
        prop_assert_eq!(snapshot(&redb), snapshot(&model));
    }
}
