#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use performance_monitoring::window::sampling_interval;
use reward_distribution::clock::{Clock, ManualClock};
use reward_distribution::oracle::{BalanceOracle, UnverifiedBalances};
use reward_distribution::repositories::MemoryStore;
use reward_distribution::{Config, EngineParts, RewardEngine};
use shared_models::{Address, CommissionRate, Delegation, Heartbeat, Operator, Result};
use tokio::sync::Notify;

/// Heartbeat history every seeded operator has: 100 minutes, i.e. 20 intervals.
pub const HISTORY_INTERVALS: i32 = 20;

pub fn address(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

/// 15:00 in Jerusalem, before the default 15:22 trigger.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

pub fn rate(percent: f64) -> CommissionRate {
    CommissionRate::from_percent(percent).unwrap()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub engine: RewardEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(MemoryStore::new(), Arc::new(UnverifiedBalances), Config::default())
    }

    pub fn without_transactions() -> Self {
        Self::build(MemoryStore::without_transactions(), Arc::new(UnverifiedBalances), Config::default())
    }

    pub fn build(store: MemoryStore, oracle: Arc<dyn BalanceOracle>, config: Config) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(now()));
        let engine = RewardEngine::new(EngineParts::memory(store.clone(), oracle, clock.clone()), &config);
        Self { store, clock, engine }
    }

    /// Operator created 100 minutes ago with heartbeats in `active` of its
    /// 20 intervals, so all-time uptime is `active * 5` percent.
    pub fn operator(&self, n: u8, active: i32, commission_percent: f64) -> Address {
        let address = address(n);
        let created_at = self.clock.now() - sampling_interval() * HISTORY_INTERVALS;
        self.store.upsert_operator(Operator {
            address: address.clone(),
            uptime_percentage: 0.0,
            commission_rate: rate(commission_percent),
            nft_amount: 0,
            reward_collector_address: None,
            created_at,
            last_heartbeat: None,
        });
        for i in 0..active {
            self.store.record_heartbeat(Heartbeat {
                client_address: address.clone(),
                timestamp: created_at + sampling_interval() * i + Duration::minutes(1),
                duration_secs: 60,
                amount: 1,
            });
        }
        address
    }

    pub fn delegate(&self, from: u8, to: u8, amount: u64) {
        self.delegate_with_snapshot(from, to, amount, 0.0);
    }

    pub fn delegate_with_snapshot(&self, from: u8, to: u8, amount: u64, snapshot_percent: f64) {
        self.store.upsert_delegation(Delegation {
            from_address: address(from),
            to_address: address(to),
            amount,
            commission_rate: rate(snapshot_percent),
            timestamp: now(),
        });
    }
}

/// Oracle that takes `delay` to answer and leaves every balance unconstrained.
/// `abandoned` is set when a lookup is dropped before it answers.
pub struct SlowOracle {
    delay: std::time::Duration,
    pub entered: Notify,
    pub abandoned: AtomicBool,
}

impl SlowOracle {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            entered: Notify::new(),
            abandoned: AtomicBool::new(false),
        })
    }
}

struct DropFlag<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl Drop for DropFlag<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BalanceOracle for SlowOracle {
    async fn verified_balance(&self, _address: &Address) -> Result<u64> {
        let mut guard = DropFlag {
            flag: &self.abandoned,
            armed: true,
        };
        self.entered.notify_one();
        tokio::time::sleep(self.delay).await;
        guard.armed = false;
        Ok(u64::MAX)
    }
}
