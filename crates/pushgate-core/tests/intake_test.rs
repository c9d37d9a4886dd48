//! Gateway intake tests.

use std::time::Duration;

use pushgate_core::{
    dedup::DEDUP_TTL,
    env::Environment,
    error::IntakeError,
    intake::{AuthContext, IntakeOutcome},
};
use pushgate_harness::{TestWorld, notification};
use pushgate_proto::{NotificationBatch, Request, Response};

fn batch(round_id: u64, ephemeral_ids: &[i64]) -> NotificationBatch {
    NotificationBatch {
        round_id,
        notifications: ephemeral_ids.iter().map(|id| notification(*id, round_id as u8)).collect(),
    }
}

#[test]
fn duplicate_round_is_buffered_once() {
    let world = TestWorld::new();
    let intake = world.service.intake();
    let gateway = AuthContext::gateway();

    assert_eq!(
        intake.receive_notification_batch(batch(1, &[10, 11]), &gateway),
        Ok(IntakeOutcome::Accepted { records: 2 })
    );
    assert_eq!(
        intake.receive_notification_batch(batch(1, &[10, 11]), &gateway),
        Ok(IntakeOutcome::Duplicate)
    );

    assert_eq!(world.service.buffer().len(), 2);
}

#[test]
fn distinct_rounds_accumulate() {
    let world = TestWorld::new();
    for round in 1..=3 {
        assert!(world.gateway_push(round, vec![notification(10, round as u8)]).is_ok());
    }

    let drained = world.service.buffer().swap();
    let rounds: Vec<_> = drained[&10].iter().map(|r| r.round_id).collect();
    assert_eq!(rounds, vec![1, 2, 3]);
}

#[test]
fn clients_cannot_push_batches() {
    let world = TestWorld::new();

    assert_eq!(
        world.service.intake().receive_notification_batch(batch(1, &[10]), &AuthContext::client()),
        Err(IntakeError::Unauthenticated)
    );
    assert!(matches!(
        world.client_call(Request::NotificationBatch(batch(2, &[10]))),
        Response::Error { .. }
    ));
    assert!(world.service.buffer().is_empty());
    assert!(world.service.dedup().is_empty());
}

#[test]
fn duplicate_is_still_success_for_gateway() {
    let world = TestWorld::new();
    assert_eq!(world.gateway_push(5, vec![notification(1, 1)]), Response::Ok);
    assert_eq!(world.gateway_push(5, vec![notification(1, 1)]), Response::Ok);
    assert_eq!(world.service.buffer().len(), 1);
}

#[test]
fn round_is_accepted_again_after_eviction() {
    let world = TestWorld::new();
    world.gateway_push(5, vec![notification(1, 1)]);
    world.service.buffer().swap();

    world.env.advance(DEDUP_TTL + Duration::from_secs(1));
    assert_eq!(world.service.dedup().sweep(world.env.unix_time()), 1);

    world.gateway_push(5, vec![notification(1, 1)]);
    assert_eq!(world.service.buffer().len(), 1);
}

#[test]
fn round_is_rejected_until_swept() {
    let world = TestWorld::new();
    world.gateway_push(5, vec![notification(1, 1)]);

    // Past the TTL but no sweep yet: still remembered
    world.env.advance(DEDUP_TTL * 2);
    world.gateway_push(5, vec![notification(1, 1)]);

    assert_eq!(world.service.buffer().len(), 1);
}
