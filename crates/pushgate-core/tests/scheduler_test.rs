//! Ephemeral scheduler tests.
//!
//! Uses a compressed schedule (100 s period, 10 phases of 10 s, 15 s lead)
//! so loop tests can cover several rotations of paused time.

use std::time::Duration;

use pushgate_core::{
    directory::Directory,
    env::Environment,
    scheduler::SchedulerConfig,
    service::ServiceConfig,
    storage::{Ephemeral, Identity, Storage},
    time::TimeModel,
};
use pushgate_harness::TestWorld;
use tokio_util::sync::CancellationToken;

fn small_config() -> ServiceConfig {
    let time = TimeModel::new(Duration::from_secs(100), 10);
    let scheduler = SchedulerConfig {
        creation_lead: Duration::from_secs(15),
        deletion_delay: Duration::from_secs(105),
        max_lookback: Duration::from_secs(100),
    };
    let mut config = ServiceConfig { time, scheduler, ..ServiceConfig::default() };
    config.registrar.creation_lead = scheduler.creation_lead;
    config
}

/// Insert identities until every phase has at least one; returns them.
fn seed_identities(world: &TestWorld) -> Vec<Identity> {
    let time = world.config().time;
    let mut identities = Vec::new();
    for i in 0u32..200 {
        let intermediary_id = i.to_be_bytes().to_vec();
        let identity = Identity { offset: time.offset_of(&intermediary_id), intermediary_id };
        world.storage.upsert_identity(&identity).unwrap();
        identities.push(identity);
    }
    identities
}

#[test]
fn materialize_covers_exactly_one_phase() {
    let world = TestWorld::with_config(small_config());
    let identities = seed_identities(&world);
    let scheduler = world.service.scheduler();
    let time = world.config().time;

    let epoch = 1_234;
    let covered = scheduler.materialize_epoch(epoch).unwrap();

    let expected: Vec<_> =
        identities.iter().filter(|i| i.offset == time.offset_for_epoch(epoch)).collect();
    assert_eq!(covered, expected.len());
    assert!(covered > 0);
    assert_eq!(world.storage.inner().ephemeral_count(), covered);

    for identity in expected {
        let ephemerals = world.storage.ephemerals_for_identity(&identity.intermediary_id).unwrap();
        assert_eq!(ephemerals.len(), 1);
        assert_eq!(ephemerals[0].epoch, epoch);
    }

    // Idempotent
    assert_eq!(scheduler.materialize_epoch(epoch).unwrap(), covered);
    assert_eq!(world.storage.inner().ephemeral_count(), covered);
}

#[test]
fn ephemerals_survive_one_full_period() {
    let world = TestWorld::with_config(small_config());
    let scheduler = world.service.scheduler();
    let time = world.config().time;

    let epoch = 500;
    world
        .storage
        .upsert_ephemeral(&Ephemeral { ephemeral_id: 1, epoch, intermediary_id: vec![1] })
        .unwrap();

    let issued = time.epoch_start(epoch);
    assert_eq!(scheduler.delete_expired(issued + time.period()).unwrap(), 0);
    assert_eq!(scheduler.delete_expired(issued + time.period() + Duration::from_secs(5)).unwrap(), 0);

    let expired = time.epoch_start(epoch + 1) + world.config().scheduler.deletion_delay;
    assert_eq!(scheduler.delete_expired(expired).unwrap(), 1);
    assert_eq!(scheduler.delete_expired(expired).unwrap(), 0);
}

#[test]
fn initial_cursor_resumes_within_lookback() {
    let world = TestWorld::with_config(small_config());
    let scheduler = world.service.scheduler();
    let time = world.config().time;
    let now = world.env.unix_time();
    let floor = time.epoch_at(now - Duration::from_secs(100));

    assert_eq!(scheduler.initial_cursor(now), floor);

    world
        .storage
        .upsert_ephemeral(&Ephemeral { ephemeral_id: 1, epoch: floor - 50, intermediary_id: vec![1] })
        .unwrap();
    assert_eq!(scheduler.initial_cursor(now), floor);

    world
        .storage
        .upsert_ephemeral(&Ephemeral { ephemeral_id: 2, epoch: floor + 3, intermediary_id: vec![2] })
        .unwrap();
    assert_eq!(scheduler.initial_cursor(now), floor + 4);
}

#[tokio::test]
async fn failed_epoch_is_retried_not_skipped() {
    let world = TestWorld::with_config(small_config());
    seed_identities(&world);
    let scheduler = world.service.scheduler();
    let cancel = CancellationToken::new();

    let mut cursor = 100;
    world.storage.fail_ephemerals(true);
    scheduler.advance(&mut cursor, 109, &cancel).await;
    assert_eq!(cursor, 100);

    world.storage.fail_ephemerals(false);
    scheduler.advance(&mut cursor, 109, &cancel).await;
    assert_eq!(cursor, 110);

    // All ten phases of the rotation got written
    assert_eq!(world.storage.inner().ephemeral_count(), 200);
}

#[tokio::test]
async fn advance_stops_on_cancel() {
    let world = TestWorld::with_config(small_config());
    let scheduler = world.service.scheduler();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut cursor = 0;
    scheduler.advance(&mut cursor, 1_000, &cancel).await;
    assert_eq!(cursor, 0);
}

#[tokio::test(start_paused = true)]
async fn loops_keep_ephemerals_fresh() {
    let world = TestWorld::with_config(small_config());
    let identities = seed_identities(&world);
    let time = world.config().time;
    let handle = world.service.start();

    // Three full rotations, landing mid-epoch
    tokio::time::sleep(Duration::from_secs(305)).await;

    let now = world.env.unix_time();
    let size = world.directory.address_space_size();
    for identity in &identities {
        let (expected, epoch) = time.current_ephemeral(&identity.intermediary_id, now, size);
        let ephemerals = world.storage.ephemerals_for_identity(&identity.intermediary_id).unwrap();
        assert!(
            ephemerals.iter().any(|e| e.epoch == epoch && e.ephemeral_id == expected),
            "identity {:?} has no current ephemeral",
            identity.intermediary_id
        );
        // Nothing older than the retention window survives
        let threshold = time.epoch_at(now - Duration::from_secs(105));
        assert!(ephemerals.iter().all(|e| e.epoch >= threshold - 1));
    }

    tokio::time::timeout(Duration::from_secs(10), handle.stop()).await.unwrap();
}
