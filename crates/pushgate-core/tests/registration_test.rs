//! Registration protocol tests.
//!
//! Every request here is signed by a harness `TestUser` exactly as a client
//! would sign it; the failure cases tamper with one thing at a time.

use std::time::Duration;

use pushgate_core::{
    error::RegistrationError,
    registration::key_hash,
    storage::Storage,
};
use pushgate_harness::TestWorld;
use pushgate_proto::{Request, Response, SignatureTag, SigningDigest};

const SECOND: i64 = 1_000_000_000;

fn iid(tag: u8) -> Vec<u8> {
    vec![tag; 33]
}

#[test]
fn register_token_creates_user_and_token() {
    let world = TestWorld::new();
    let user = world.user(1);

    world
        .service
        .registrar()
        .register_token(&user.register_token("android", "tok-1", world.env.now_nanos()))
        .unwrap();

    let hash = key_hash(&user.pem);
    let stored = world.storage.get_user(&hash).unwrap().unwrap();
    assert_eq!(stored.transmission_key_pem, user.pem);
    assert_eq!(stored.signature, user.permissioning_sig);

    let token = world.storage.get_token("tok-1").unwrap().unwrap();
    assert_eq!(token.app, "android");
    assert_eq!(token.owner, hash);
}

#[test]
fn replay_window_rejects_old_requests() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();

    let stale = user.register_token("android", "tok-1", world.env.now_nanos() - 10 * SECOND);
    assert!(matches!(
        registrar.register_token(&stale),
        Err(RegistrationError::StaleRequest { .. })
    ));
    assert!(world.storage.get_token("tok-1").unwrap().is_none());

    let fresh = user.register_token("android", "tok-1", world.env.now_nanos() - 2 * SECOND);
    registrar.register_token(&fresh).unwrap();
    assert!(world.storage.get_token("tok-1").unwrap().is_some());
}

#[test]
fn replay_window_rejects_future_requests() {
    let world = TestWorld::new();
    let user = world.user(1);

    let future = user.register_token("android", "tok-1", world.env.now_nanos() + 10 * SECOND);
    assert!(matches!(
        world.service.registrar().register_token(&future),
        Err(RegistrationError::StaleRequest { .. })
    ));
}

#[test]
fn request_ages_out_of_window() {
    let world = TestWorld::new();
    let user = world.user(1);
    let req = user.register_token("android", "tok-1", world.env.now_nanos());

    world.env.advance(Duration::from_secs(6));

    assert!(matches!(
        world.service.registrar().register_token(&req),
        Err(RegistrationError::StaleRequest { .. })
    ));
}

#[test]
fn empty_token_and_app_are_rejected() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    assert_eq!(
        registrar.register_token(&user.register_token("android", "", now)),
        Err(RegistrationError::EmptyToken)
    );
    assert_eq!(
        registrar.register_token(&user.register_token("", "tok", now)),
        Err(RegistrationError::EmptyApp)
    );
    assert_eq!(
        registrar.register_tracked_id(&user.register_tracked_id(&[], now)),
        Err(RegistrationError::NoTrackedIds)
    );
}

#[test]
fn empty_intermediary_ids_are_rejected() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    let mixed = user.register_tracked_id(&[vec![3; 33], Vec::new()], now);
    assert_eq!(registrar.register_tracked_id(&mixed), Err(RegistrationError::EmptyIntermediaryId));
    assert_eq!(
        registrar.register_for_notifications(&user.register_for_notifications("tok", &[])),
        Err(RegistrationError::EmptyIntermediaryId)
    );

    // Rejected before any write
    assert!(world.storage.get_user(&key_hash(&user.pem)).unwrap().is_none());
    assert!(world.storage.get_identity(&[3; 33]).unwrap().is_none());
    assert!(world.storage.get_identity(&[]).unwrap().is_none());
}

#[test]
fn unenrolled_key_is_rejected() {
    let world = TestWorld::new();
    let user = world.user(1);
    let mut req = user.register_token("android", "tok-1", world.env.now_nanos());
    req.transmission_key_salt = b"different salt".to_vec();

    assert_eq!(
        world.service.registrar().register_token(&req),
        Err(RegistrationError::InvalidSignature { what: "permissioning" })
    );
    assert!(world.storage.get_user(&key_hash(&user.pem)).unwrap().is_none());
}

#[test]
fn token_signature_covers_app() {
    let world = TestWorld::new();
    let user = world.user(1);
    let mut req = user.register_token("android", "tok-1", world.env.now_nanos());
    req.app = "ios".to_string();

    assert_eq!(
        world.service.registrar().register_token(&req),
        Err(RegistrationError::InvalidSignature { what: "token" })
    );
}

#[test]
fn garbage_key_is_rejected() {
    let world = TestWorld::new();
    let user = world.user(1);
    let mut req = user.register_token("android", "tok-1", world.env.now_nanos());
    req.transmission_key_pem = "not a key".to_string();

    assert!(matches!(
        world.service.registrar().register_token(&req),
        Err(RegistrationError::InvalidKey(_))
    ));
}

#[test]
fn tracked_id_signature_is_tag_scoped() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();
    let ids = vec![iid(9)];

    registrar.register_tracked_id(&user.register_tracked_id(&ids, now)).unwrap();

    // Register signature presented to unregister
    let register = user.register_tracked_id(&ids, now);
    let mut unregister = user.unregister_tracked_id(&ids, now);
    unregister.signature = register.signature.clone();
    assert_eq!(
        registrar.unregister_tracked_id(&unregister),
        Err(RegistrationError::InvalidSignature { what: "tracked id" })
    );
    assert_eq!(world.storage.users_for_identity(&ids[0]).unwrap().len(), 1);

    // Unregister signature presented to register
    let mut register = user.register_tracked_id(&[iid(10)], now);
    register.signature = user.unregister_tracked_id(&[iid(10)], now).signature;
    assert_eq!(
        registrar.register_tracked_id(&register),
        Err(RegistrationError::InvalidSignature { what: "tracked id" })
    );
    assert!(world.storage.get_identity(&iid(10)).unwrap().is_none());
}

#[test]
fn register_tracked_id_makes_identity_reachable() {
    let world = TestWorld::new();
    let user = world.user(1);
    let now = world.env.now_nanos();

    world
        .service
        .registrar()
        .register_token(&user.register_token("android", "tok-1", now))
        .unwrap();
    world
        .service
        .registrar()
        .register_tracked_id(&user.register_tracked_id(&[iid(9)], now))
        .unwrap();

    let ephemeral_id = world.current_ephemeral(&iid(9));
    let targets = world.storage.get_to_notify(&[ephemeral_id]).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].token, "tok-1");

    let identity = world.storage.get_identity(&iid(9)).unwrap().unwrap();
    assert_eq!(identity.offset, world.config().time.offset_of(&iid(9)));
    for ephemeral in world.storage.ephemerals_for_identity(&iid(9)).unwrap() {
        assert_eq!(world.config().time.offset_for_epoch(ephemeral.epoch), identity.offset);
    }
}

#[test]
fn unregister_tracked_id_unlinks() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    registrar.register_tracked_id(&user.register_tracked_id(&[iid(1), iid(2)], now)).unwrap();
    registrar.unregister_tracked_id(&user.unregister_tracked_id(&[iid(1)], now)).unwrap();

    assert!(world.storage.users_for_identity(&iid(1)).unwrap().is_empty());
    assert_eq!(world.storage.users_for_identity(&iid(2)).unwrap().len(), 1);

    // Unknown links are fine
    registrar.unregister_tracked_id(&user.unregister_tracked_id(&[iid(7)], now)).unwrap();
}

#[test]
fn unregister_token_requires_ownership() {
    let world = TestWorld::new();
    let alice = world.user(1);
    let mallory = world.user(2);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    registrar.register_token(&alice.register_token("android", "tok-a", now)).unwrap();
    registrar.register_token(&mallory.register_token("android", "tok-m", now)).unwrap();

    registrar.unregister_token(&mallory.unregister_token("android", "tok-a", now)).unwrap();
    assert!(world.storage.get_token("tok-a").unwrap().is_some());

    registrar.unregister_token(&alice.unregister_token("android", "tok-a", now)).unwrap();
    assert!(world.storage.get_token("tok-a").unwrap().is_none());

    // Already gone, and an unknown user
    registrar.unregister_token(&alice.unregister_token("android", "tok-a", now)).unwrap();
    registrar
        .unregister_token(&world.user(3).unregister_token("android", "tok-m", now))
        .unwrap();
    assert!(world.storage.get_token("tok-m").unwrap().is_some());
}

#[test]
fn token_signature_is_tag_scoped() {
    let world = TestWorld::new();
    let alice = world.user(1);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    let register = alice.register_token("android", "tok-a", now);
    registrar.register_token(&register).unwrap();

    let mut unregister = alice.unregister_token("android", "tok-a", now);
    unregister.token_sig = register.token_sig;
    assert_eq!(
        registrar.unregister_token(&unregister),
        Err(RegistrationError::InvalidSignature { what: "token" })
    );
    assert!(world.storage.get_token("tok-a").unwrap().is_some());
}

#[test]
fn reregistering_moves_token() {
    let world = TestWorld::new();
    let alice = world.user(1);
    let bob = world.user(2);
    let registrar = world.service.registrar();
    let now = world.env.now_nanos();

    registrar.register_token(&alice.register_token("android", "shared", now)).unwrap();
    registrar.register_token(&bob.register_token("ios", "shared", now)).unwrap();

    let token = world.storage.get_token("shared").unwrap().unwrap();
    assert_eq!(token.owner, key_hash(&bob.pem));
    assert_eq!(token.app, "ios");
    assert!(world.storage.tokens_for_user(&key_hash(&alice.pem)).unwrap().is_empty());
}

#[test]
fn legacy_register_and_unregister() {
    let world = TestWorld::new();
    let user = world.user(1);
    let registrar = world.service.registrar();

    registrar.register_for_notifications(&user.register_for_notifications("tok-1", &iid(4))).unwrap();

    let ephemeral_id = world.current_ephemeral(&iid(4));
    let targets = world.storage.get_to_notify(&[ephemeral_id]).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].app, world.config().registrar.legacy_app);

    registrar.unregister_for_notifications(&user.unregister_for_notifications(&iid(4))).unwrap();
    assert!(world.storage.get_user(&key_hash(&user.pem)).unwrap().is_none());
    assert!(world.storage.get_token("tok-1").unwrap().is_none());

    // Nothing left to remove
    registrar.unregister_for_notifications(&user.unregister_for_notifications(&iid(4))).unwrap();
}

#[test]
fn legacy_register_checks_intermediary_signature() {
    let world = TestWorld::new();
    let user = world.user(1);
    let mut req = user.register_for_notifications("tok-1", &iid(4));
    req.intermediary_id = iid(5);

    assert_eq!(
        world.service.registrar().register_for_notifications(&req),
        Err(RegistrationError::InvalidSignature { what: "intermediary id" })
    );
    assert!(world.storage.get_identity(&iid(5)).unwrap().is_none());
}

#[test]
fn legacy_register_rejects_empty_token() {
    let world = TestWorld::new();
    let user = world.user(1);

    assert_eq!(
        world
            .service
            .registrar()
            .register_for_notifications(&user.register_for_notifications("", &iid(4))),
        Err(RegistrationError::EmptyToken)
    );
}

#[test]
fn legacy_unregister_refuses_shared_identity() {
    let world = TestWorld::new();
    let alice = world.user(1);
    let bob = world.user(2);
    let registrar = world.service.registrar();

    registrar.register_for_notifications(&alice.register_for_notifications("tok-a", &iid(4))).unwrap();
    registrar.register_for_notifications(&bob.register_for_notifications("tok-b", &iid(4))).unwrap();

    assert_eq!(
        registrar.unregister_for_notifications(&alice.unregister_for_notifications(&iid(4))),
        Err(RegistrationError::AmbiguousIdentity { users: 2 })
    );
    assert!(world.storage.get_token("tok-a").unwrap().is_some());
}

#[test]
fn legacy_unregister_checks_signature() {
    let world = TestWorld::new();
    let alice = world.user(1);
    let mallory = world.user(2);
    let registrar = world.service.registrar();

    registrar.register_for_notifications(&alice.register_for_notifications("tok-a", &iid(4))).unwrap();

    assert_eq!(
        registrar.unregister_for_notifications(&mallory.unregister_for_notifications(&iid(4))),
        Err(RegistrationError::InvalidSignature { what: "intermediary id" })
    );
    assert!(world.storage.get_user(&key_hash(&alice.pem)).unwrap().is_some());
}

#[test]
fn rejected_request_becomes_error_response() {
    let world = TestWorld::new();
    let user = world.user(1);
    let mut req = user.register_token("android", "tok-1", world.env.now_nanos());
    req.token_sig = user.sign(&SigningDigest::new(SignatureTag::RegisterToken).finish());

    match world.client_call(Request::RegisterToken(req)) {
        Response::Error { message } => assert!(message.contains("token signature")),
        Response::Ok => panic!("forged request accepted"),
    }
}
