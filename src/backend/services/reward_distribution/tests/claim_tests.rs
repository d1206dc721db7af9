mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{address, Fixture};
use reward_distribution::oracle::UnverifiedBalances;
use reward_distribution::repositories::{ClaimRepository, FailPoint, MemoryStore};
use reward_distribution::Config;
use shared_models::{RewardError, UserType};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

/// Operator 10 at 100% uptime and 5% commission, delegator 1 with 2 NFTs:
/// delegator earns 1900, operator 1100.
async fn rewarded(fx: &Fixture) {
    fx.operator(10, 20, 5.0);
    fx.delegate(1, 10, 2);
    fx.engine.run_cycle(None).await.unwrap();
}

fn reward_id_of(fx: &Fixture, n: u8) -> Uuid {
    fx.store
        .rewards()
        .into_iter()
        .find(|r| r.address == address(n))
        .map(|r| r.id)
        .unwrap()
}

#[tokio::test]
async fn test_claim_round_trip() {
    let fx = Fixture::new();
    rewarded(&fx).await;
    let id = reward_id_of(&fx, 1);

    let claimed = assert_ok!(fx.engine.claim_one(id, &address(1)).await);

    assert!(claimed.claimed);
    assert!(claimed.claimed_at.is_some());
    assert_eq!(fx.engine.user_claimed_points(&address(1)).await.unwrap(), claimed.points);
    assert_eq!(claimed.points, 1900);
}

#[tokio::test]
async fn test_claim_all_twice_is_a_no_op() {
    let fx = Fixture::new();
    rewarded(&fx).await;

    let first = fx.engine.claim_all(&address(10)).await.unwrap();
    assert_eq!(first.claimed_count, 1);
    assert_eq!(first.total_points, 1100);

    let second = fx.engine.claim_all(&address(10)).await.unwrap();
    assert_eq!(second.claimed_count, 0);
    assert_eq!(second.total_points, 0);
    assert_eq!(fx.engine.user_claimed_points(&address(10)).await.unwrap(), 1100);
}

#[tokio::test]
async fn test_claim_all_with_nothing_to_claim() {
    let fx = Fixture::new();
    let receipt = fx.engine.claim_all(&address(5)).await.unwrap();
    assert_eq!((receipt.claimed_count, receipt.total_points), (0, 0));
    assert_eq!(fx.engine.user_claimed_points(&address(5)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_claim_one_preconditions() {
    let fx = Fixture::new();
    rewarded(&fx).await;
    let id = reward_id_of(&fx, 1);

    // Someone else's record.
    let err = fx.engine.claim_one(id, &address(10)).await.unwrap_err();
    assert!(matches!(err, RewardError::NotFound(_)));

    // Unknown record.
    let err = fx.engine.claim_one(Uuid::new_v4(), &address(1)).await.unwrap_err();
    assert!(matches!(err, RewardError::NotFound(_)));

    // Already claimed.
    fx.engine.claim_one(id, &address(1)).await.unwrap();
    let err = fx.engine.claim_one(id, &address(1)).await.unwrap_err();
    assert!(matches!(err, RewardError::NotFound(_)));
    assert_eq!(fx.engine.user_claimed_points(&address(1)).await.unwrap(), 1900);
}

#[tokio::test]
async fn test_claims_accumulate_across_cycles() {
    let fx = Fixture::new();
    rewarded(&fx).await;
    fx.clock.advance(Duration::days(1));
    // Keep the operator's uptime high on the second day.
    fx.operator(10, 20, 5.0);
    fx.engine.run_cycle(None).await.unwrap();

    let history = fx.engine.rewards_for(&address(1)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at > history[1].created_at);
    assert_eq!(history[0].cycle_id.as_str(), "CYCLE_2026-06-02");

    let receipt = fx.engine.claim_all(&address(1)).await.unwrap();
    assert_eq!(receipt.claimed_count, 2);
    assert_eq!(receipt.total_points, 3800);

    let user_points = fx.engine.user_claimed_points(&address(1)).await.unwrap();
    let claimed_sum: i64 = fx
        .engine
        .rewards_for(&address(1))
        .await
        .unwrap()
        .iter()
        .filter(|r| r.claimed)
        .map(|r| r.points)
        .sum();
    assert_eq!(user_points, claimed_sum);
}

#[tokio::test]
async fn test_transactional_claim_rolls_back() {
    let fx = Fixture::new();
    rewarded(&fx).await;
    fx.store.fail_once(FailPoint::ClaimCredit);

    let err = assert_err!(fx.engine.claim_all(&address(1)).await);
    assert!(err.is_retryable());
    assert!(fx.store.rewards().iter().all(|r| !r.claimed));
    assert_eq!(fx.engine.user_claimed_points(&address(1)).await.unwrap(), 0);

    let receipt = fx.engine.claim_all(&address(1)).await.unwrap();
    assert_eq!(receipt.total_points, 1900);
    assert_eq!(fx.engine.user_claimed_points(&address(1)).await.unwrap(), 1900);
}

#[tokio::test]
async fn test_best_effort_claim_partial_failure() {
    let fx = Fixture::without_transactions();
    rewarded(&fx).await;
    fx.store.fail_once(FailPoint::CreditUser);

    assert_err!(fx.engine.claim_all(&address(1)).await);

    // Reduced guarantee: the record flipped but the user was never credited.
    let record = fx.store.rewards().into_iter().find(|r| r.address == address(1)).unwrap();
    assert!(record.claimed);
    assert_eq!(fx.engine.user_claimed_points(&address(1)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_best_effort_claim_without_faults() {
    let fx = Fixture::without_transactions();
    rewarded(&fx).await;

    let receipt = fx.engine.claim_all(&address(10)).await.unwrap();

    assert_eq!(receipt.total_points, 1100);
    assert_eq!(fx.engine.user_claimed_points(&address(10)).await.unwrap(), 1100);
}

#[tokio::test]
async fn test_best_effort_can_be_disabled() {
    let mut config = Config::default();
    config.claims.require_transactions = true;
    let fx = Fixture::build(MemoryStore::without_transactions(), Arc::new(UnverifiedBalances), config);
    rewarded(&fx).await;

    let err = fx.engine.claim_all(&address(1)).await.unwrap_err();

    assert!(matches!(err, RewardError::Validation(_)));
    assert!(fx.store.rewards().iter().all(|r| !r.claimed));
}

#[tokio::test]
async fn test_user_type_follows_first_claim() {
    let fx = Fixture::new();
    rewarded(&fx).await;

    fx.engine.claim_all(&address(10)).await.unwrap();

    let user = fx.store.get_user(&address(10)).await.unwrap().unwrap();
    assert_eq!(user.user_type, UserType::Operator);
    assert!(user.last_claim_time.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_credit_once() {
    let fx = Fixture::new();
    rewarded(&fx).await;
    let id = reward_id_of(&fx, 1);
    let engine = Arc::new(fx.engine);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.claim_one(id, &address(1)).await })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert!(matches!(err, RewardError::NotFound(_))),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(engine.user_claimed_points(&address(1)).await.unwrap(), 1900);
}
