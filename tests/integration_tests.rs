//! Integration tests for the pairing-room matchmaking service
//!
//! These tests drive the whole stack through the event consumer:
//! - Queue joins forming pairs and publishing match events
//! - Leaves and their edge cases
//! - Schedule-aware pairing and conflict detection
//! - Storage and broker failures

mod fixtures;

use chrono::Weekday;
use pairing_room::config::MatchmakingSettings;
use pairing_room::error::{categorize, ErrorCategory, MatchmakingError};
use pairing_room::pairing::{AdvisoryStatus, ConflictStatus, PairStore};
use pairing_room::pool::PoolStore;
use pairing_room::schedule::{Candidate, PartyScheduleMatcher};
use pairing_room::ConsumerAction;
use std::sync::Arc;
use uuid::Uuid;

use fixtures::{
    create_system_with_publisher, create_test_system, create_test_system_with, queue_joined,
    queue_left, register_party, weekly, FailingPublisher,
};

#[tokio::test]
async fn test_two_players_form_a_match() {
    let system = create_test_system();
    let game = Uuid::new_v4();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

    // Step 1: first player waits alone
    let first = system
        .consumer
        .handle_event(queue_joined(x, game, "eu-west", 1500.0))
        .await
        .unwrap();
    assert_eq!(
        first.value,
        ConsumerAction::Queued {
            position: 1,
            pool_size: 1
        }
    );
    assert!(system.publisher.published().is_empty());

    // Step 2: second player completes the pair
    let second = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap();
    let ConsumerAction::Paired { pair_id, player_ids } = second.value.clone() else {
        panic!("expected a pair, got {:?}", second.value);
    };
    assert_eq!(player_ids, vec![x, y]);
    assert_eq!(second.failures().count(), 0);

    // Step 3: pool drained, pair stored, one event out
    let pools = system.service.registry().pools().unwrap();
    assert_eq!(pools.len(), 1);
    assert!(pools[0].is_empty().unwrap());

    let stored = system.pairs.get_by_id(pair_id).await.unwrap();
    assert_eq!(stored.player_ids(), vec![x, y]);
    assert_eq!(stored.created_by, y);

    let published = system.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].match_id, pair_id);
    assert_eq!(published[0].player_ids, vec![x, y]);
}

#[tokio::test]
async fn test_third_player_starts_a_new_round() {
    let system = create_test_system();
    let game = Uuid::new_v4();

    for _ in 0..2 {
        system
            .consumer
            .handle_event(queue_joined(Uuid::new_v4(), game, "eu-west", 1500.0))
            .await
            .unwrap();
    }

    let third = system
        .consumer
        .handle_event(queue_joined(Uuid::new_v4(), game, "eu-west", 1500.0))
        .await
        .unwrap();
    assert_eq!(
        third.value,
        ConsumerAction::Queued {
            position: 1,
            pool_size: 1
        }
    );
    assert_eq!(system.publisher.published().len(), 1);
}

#[tokio::test]
async fn test_unknown_region_is_rejected_without_side_effects() {
    let system = create_test_system();

    let err = system
        .consumer
        .handle_event(queue_joined(Uuid::new_v4(), Uuid::new_v4(), "moon-base", 1500.0))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::RegionNotFound { .. })
    ));
    assert_eq!(categorize(&err), ErrorCategory::NotFound);
    assert!(!categorize(&err).is_retryable());
    assert!(system.service.registry().is_empty().unwrap());
    assert_eq!(system.pools.save_count(), 0);
}

#[tokio::test]
async fn test_leave_of_player_never_queued() {
    let system = create_test_system();
    let game = Uuid::new_v4();
    let x = Uuid::new_v4();

    // Leaves an empty pool behind
    system
        .consumer
        .handle_event(queue_joined(x, game, "eu-west", 1500.0))
        .await
        .unwrap();
    let left = system
        .consumer
        .handle_event(queue_left(x, game, "eu-west"))
        .await
        .unwrap();
    assert!(matches!(left.value, ConsumerAction::Left { .. }));
    let saves = system.pools.save_count();

    let err = system
        .consumer
        .handle_event(queue_left(Uuid::new_v4(), game, "eu-west"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::PartyNotQueued { .. })
    ));
    assert_eq!(system.pools.save_count(), saves);
}

#[tokio::test]
async fn test_leave_without_any_pool_is_ignored() {
    let system = create_test_system();

    let outcome = system
        .consumer
        .handle_event(queue_left(Uuid::new_v4(), Uuid::new_v4(), "us-east"))
        .await
        .unwrap();
    assert_eq!(outcome.value, ConsumerAction::LeaveIgnored);
    assert_eq!(system.pools.save_count(), 0);
}

#[tokio::test]
async fn test_left_player_is_not_paired() {
    let system = create_test_system();
    let game = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    system.consumer.handle_event(queue_joined(a, game, "eu-west", 1500.0)).await.unwrap();
    system.consumer.handle_event(queue_left(a, game, "eu-west")).await.unwrap();
    system.consumer.handle_event(queue_joined(b, game, "eu-west", 1500.0)).await.unwrap();
    let outcome = system
        .consumer
        .handle_event(queue_joined(c, game, "eu-west", 1500.0))
        .await
        .unwrap();

    let ConsumerAction::Paired { player_ids, .. } = outcome.value else {
        panic!("expected a pair, got {:?}", outcome.value);
    };
    assert_eq!(player_ids, vec![b, c]);
}

#[tokio::test]
async fn test_schedule_matching_skips_incompatible_party() {
    let settings = MatchmakingSettings {
        match_on_schedule: true,
        ..MatchmakingSettings::default()
    };
    let system = create_test_system_with(settings);
    let game = Uuid::new_v4();

    let a = register_party(&system.parties, Some(weekly(Weekday::Mon, 10, 12)));
    let c = register_party(&system.parties, Some(weekly(Weekday::Tue, 10, 12)));
    let b = register_party(&system.parties, Some(weekly(Weekday::Mon, 11, 13)));

    // A and C never overlap, so both wait
    for id in [a, c] {
        let outcome = system
            .consumer
            .handle_event(queue_joined(id, game, "eu-west", 1500.0))
            .await
            .unwrap();
        assert!(matches!(outcome.value, ConsumerAction::Queued { .. }));
    }

    let outcome = system
        .consumer
        .handle_event(queue_joined(b, game, "eu-west", 1500.0))
        .await
        .unwrap();
    let ConsumerAction::Paired { player_ids, .. } = outcome.value else {
        panic!("expected a pair, got {:?}", outcome.value);
    };
    assert_eq!(player_ids, vec![a, b]);

    let pools = system.service.registry().pools().unwrap();
    assert_eq!(pools[0].waiting().unwrap(), vec![c]);

    // Nobody else shares a window with C, so three is infeasible
    let candidates = vec![
        Candidate::new(a, Some(weekly(Weekday::Mon, 10, 12))),
        Candidate::new(c, Some(weekly(Weekday::Tue, 10, 12))),
        Candidate::new(b, Some(weekly(Weekday::Mon, 11, 13))),
    ];
    let err = PartyScheduleMatcher::execute(&candidates, 3).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::UnableToMatch {
            required: 3,
            candidates: 3
        })
    ));
}

#[tokio::test]
async fn test_pairs_with_disjoint_availability_are_flagged() {
    let system = create_test_system();
    let (first_game, second_game) = (Uuid::new_v4(), Uuid::new_v4());

    let p = register_party(&system.parties, None);
    let q = register_party(&system.parties, Some(weekly(Weekday::Mon, 10, 12)));
    let r = register_party(&system.parties, Some(weekly(Weekday::Tue, 10, 12)));

    for (id, game) in [(p, first_game), (q, first_game), (p, second_game), (r, second_game)] {
        system
            .consumer
            .handle_event(queue_joined(id, game, "eu-west", 1500.0))
            .await
            .unwrap();
    }

    let pairs = system.pairs.find_pairs_by_party(p).await.unwrap();
    assert_eq!(pairs.len(), 2);
    for pair in &pairs {
        assert_eq!(pair.conflict_status, ConflictStatus::Flagged);
        assert!(pair.conflict_reason.is_some());
    }

    let report = system.service.verify_conflicts(p).await.unwrap();
    assert!(report.has_conflicts());
    assert_eq!(report.conflicting_pairs.len(), 2);
    for pair in &pairs {
        assert!(report.conflicting_pairs.contains(&pair.id));
    }

    // Q and R have a single pair each
    assert!(!system.service.verify_conflicts(q).await.unwrap().has_conflicts());

    // Resolved pairs are reported but not flagged again
    let resolved = system.service.resolve_conflict(pairs[0].id).await.unwrap();
    assert_eq!(resolved.conflict_status, ConflictStatus::Resolved);
    let report = system.service.verify_conflicts(p).await.unwrap();
    assert_eq!(report.conflicting_pairs.len(), 2);
    assert!(report.flagged.is_empty());
}

#[tokio::test]
async fn test_publish_failure_is_advisory() {
    let system = create_system_with_publisher(Arc::new(FailingPublisher));
    let game = Uuid::new_v4();

    system
        .consumer
        .handle_event(queue_joined(Uuid::new_v4(), game, "eu-west", 1500.0))
        .await
        .unwrap();
    let outcome = system
        .consumer
        .handle_event(queue_joined(Uuid::new_v4(), game, "eu-west", 1500.0))
        .await
        .unwrap();

    let ConsumerAction::Paired { pair_id, .. } = outcome.value else {
        panic!("expected a pair, got {:?}", outcome.value);
    };
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, "publish match created");

    // The pair survives the broker outage
    assert!(system.pairs.get_by_id(pair_id).await.is_ok());
}

#[tokio::test]
async fn test_pool_save_failure_after_join_is_advisory() {
    let system = create_test_system();
    system.pools.fail_saves(true);

    let outcome = system
        .consumer
        .handle_event(queue_joined(Uuid::new_v4(), Uuid::new_v4(), "eu-west", 1500.0))
        .await
        .unwrap();
    assert!(matches!(outcome.value, ConsumerAction::Queued { .. }));

    let failure = outcome.failures().next().expect("advisory failure");
    assert_eq!(failure.action, "persist pool after join");
    assert!(matches!(failure.status, AdvisoryStatus::Failed { .. }));
    assert_eq!(system.service.registry().waiting_parties().unwrap(), 1);
}

#[tokio::test]
async fn test_pool_save_failure_after_drain_is_fatal() {
    let system = create_test_system();
    let game = Uuid::new_v4();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

    system.consumer.handle_event(queue_joined(x, game, "eu-west", 1500.0)).await.unwrap();
    system.pools.fail_saves(true);

    let err = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::StorageFailed { phase, .. }) if phase == "persist pool after drain"
    ));
    assert!(categorize(&err).is_retryable());

    // The pair was stored before the pool save; nothing is published
    assert_eq!(system.pairs.len(), 1);
    assert!(system.publisher.published().is_empty());

    // Redelivery while the store is still down fails the same way
    let err = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap_err();
    assert!(categorize(&err).is_retryable());
    assert_eq!(system.pairs.len(), 1);
    assert!(system.publisher.published().is_empty());

    // Once the store recovers, redelivery publishes the stored pair
    system.pools.fail_saves(false);
    let outcome = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap();
    let ConsumerAction::Paired { pair_id, player_ids } = outcome.value else {
        panic!("expected a pair, got {:?}", outcome.value);
    };
    assert_eq!(player_ids, vec![x, y]);
    assert_eq!(system.pairs.len(), 1);

    let pools = system.service.registry().pools().unwrap();
    assert!(pools[0].is_empty().unwrap());
    let stored = system.pools.find_pool(&pools[0].key().fingerprint()).await.unwrap().unwrap();
    assert!(stored.is_empty());

    let published = system.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].match_id, pair_id);

    // The pair is settled; a later join queues the player again
    let outcome = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap();
    assert!(matches!(outcome.value, ConsumerAction::Queued { .. }));
}

#[tokio::test]
async fn test_pair_save_failure_restores_pool() {
    let system = create_test_system();
    let game = Uuid::new_v4();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    system.pairs.fail_saves(true);

    system.consumer.handle_event(queue_joined(x, game, "eu-west", 1500.0)).await.unwrap();
    let err = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap_err();
    assert_eq!(categorize(&err), ErrorCategory::Storage);

    let pools = system.service.registry().pools().unwrap();
    assert_eq!(pools[0].waiting().unwrap(), vec![x, y]);

    // Redelivery after recovery pairs the same players
    system.pairs.fail_saves(false);
    let outcome = system
        .consumer
        .handle_event(queue_joined(y, game, "eu-west", 1500.0))
        .await
        .unwrap();
    let ConsumerAction::Paired { player_ids, .. } = outcome.value else {
        panic!("expected a pair, got {:?}", outcome.value);
    };
    assert_eq!(player_ids, vec![x, y]);
}

#[tokio::test]
async fn test_raw_messages_through_consumer() {
    let system = create_test_system();
    let game = Uuid::new_v4();

    let payload = queue_joined(Uuid::new_v4(), game, "eu-west", 1500.0)
        .to_bytes()
        .unwrap();
    let outcome = system.consumer.handle_message(&payload).await.unwrap();
    assert!(matches!(outcome.value, ConsumerAction::Queued { .. }));

    let ignored = system
        .consumer
        .handle_message(br#"{"type":"lobby_closed","lobby_id":"x"}"#)
        .await
        .unwrap();
    assert_eq!(
        ignored.value,
        ConsumerAction::Ignored {
            kind: "lobby_closed".to_string()
        }
    );

    let err = system.consumer.handle_message(b"not json").await.unwrap_err();
    assert_eq!(categorize(&err), ErrorCategory::Validation);
}
