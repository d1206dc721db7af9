mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{address, Fixture, SlowOracle};
use reward_distribution::repositories::{FailPoint, MemoryStore};
use reward_distribution::Config;
use shared_models::{Heartbeat, RewardError};

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[tokio::test]
async fn test_transient_failures_back_off_exponentially() {
    let fx = Fixture::new();
    fx.store.fail_times(FailPoint::ListOperators, 2);

    let outcome = fx.engine.scheduler().run_once().await.unwrap();

    assert_eq!(outcome.summary.cycle_id.as_str(), "CYCLE_2026-06-01");
    assert_eq!(fx.clock.sleeps(), vec![minutes(1), minutes(2)]);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let fx = Fixture::new();
    fx.store.fail_times(FailPoint::ListOperators, 10);

    let err = fx.engine.scheduler().run_once().await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(fx.clock.sleeps(), vec![minutes(1), minutes(2), minutes(4)]);
    assert!(fx.store.summaries().is_empty());
}

#[tokio::test]
async fn test_already_processed_is_not_retried() {
    let fx = Fixture::new();
    fx.engine.run_cycle(None).await.unwrap();

    let err = fx.engine.scheduler().run_once().await.unwrap_err();

    assert!(matches!(err, RewardError::AlreadyProcessed(_)));
    assert!(fx.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_old_heartbeats_pruned_after_cycle() {
    let fx = Fixture::new();
    fx.operator(10, 4, 0.0);
    fx.store.record_heartbeat(Heartbeat {
        client_address: address(10),
        timestamp: common::now() - ChronoDuration::days(61),
        duration_secs: 60,
        amount: 1,
    });
    assert_eq!(fx.store.heartbeat_count(), 5);

    fx.engine.scheduler().run_once().await.unwrap();

    assert_eq!(fx.store.heartbeat_count(), 4);
}

#[tokio::test]
async fn test_runs_once_per_day_until_stopped() {
    let fx = Fixture::new();
    let handle = fx.engine.scheduler().spawn();

    for _ in 0..10_000 {
        if fx.store.summaries().len() >= 3 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(handle.shutdown(Duration::from_secs(5)).await);

    let ids: Vec<String> = fx
        .store
        .summaries()
        .into_iter()
        .map(|s| s.cycle_id.to_string())
        .collect();
    assert!(ids.len() >= 3, "{ids:?}");
    assert_eq!(&ids[..3], ["CYCLE_2026-06-01", "CYCLE_2026-06-02", "CYCLE_2026-06-03"]);

    // First wait is from 15:00 to the 15:22 trigger; later ones are a full day.
    let sleeps = fx.clock.sleeps();
    assert_eq!(sleeps[0], minutes(22));
    assert_eq!(sleeps[1], minutes(24 * 60));
}

#[tokio::test]
async fn test_stop_before_first_trigger() {
    let fx = Fixture::new();
    let handle = fx.engine.scheduler().spawn();

    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_cycle_outliving_grace_is_abandoned() {
    let oracle = SlowOracle::new(Duration::from_secs(60));
    let fx = Fixture::build(MemoryStore::new(), oracle.clone(), Config::default());
    fx.operator(10, 20, 5.0);
    fx.delegate(1, 10, 2);

    let handle = fx.engine.scheduler().spawn();
    oracle.entered.notified().await;

    assert!(!handle.shutdown(Duration::from_millis(50)).await);
    assert!(oracle.abandoned.load(Ordering::SeqCst));
    assert!(fx.store.summaries().is_empty());
    assert!(fx.store.rewards().is_empty());
}
