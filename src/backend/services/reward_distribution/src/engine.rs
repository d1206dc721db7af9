use std::sync::Arc;

use performance_monitoring::{HeartbeatRepository, PostgresHeartbeatRepository, Uptime, UptimeReport, UptimeSampler};
use shared_models::{Address, CycleId, Operator, Result, RewardError, RewardRecord, RewardSummary};
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::oracle::BalanceOracle;
use crate::repositories::memory::MemoryStore;
use crate::repositories::postgres::{PostgresDelegationLedger, PostgresOperatorRepository, PostgresRewardRepository};
use crate::repositories::traits::{ClaimRepository, DelegationLedger, OperatorRepository, RewardRepository};
use crate::services::{
    ClaimReceipt, ClaimService, CycleContext, CycleOutcome, CycleService, Scheduler, SchedulerSettings,
};

/// Storage and collaborator seams the engine is assembled from.
pub struct EngineParts {
    pub operators: Arc<dyn OperatorRepository>,
    pub ledger: Arc<dyn DelegationLedger>,
    pub rewards: Arc<dyn RewardRepository>,
    pub claims: Arc<dyn ClaimRepository>,
    pub heartbeats: Arc<dyn HeartbeatRepository>,
    pub oracle: Arc<dyn BalanceOracle>,
    pub clock: Arc<dyn Clock>,
}

impl EngineParts {
    /// Postgres-backed parts with the system clock.
    pub fn postgres(pool: PgPool, oracle: Arc<dyn BalanceOracle>) -> Self {
        let rewards = Arc::new(PostgresRewardRepository::new(pool.clone()));
        Self {
            operators: Arc::new(PostgresOperatorRepository::new(pool.clone())),
            ledger: Arc::new(PostgresDelegationLedger::new(pool.clone())),
            rewards: rewards.clone(),
            claims: rewards,
            heartbeats: Arc::new(PostgresHeartbeatRepository::new(pool)),
            oracle,
            clock: Arc::new(SystemClock),
        }
    }

    /// Every repository served by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>, oracle: Arc<dyn BalanceOracle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            operators: store.clone(),
            ledger: store.clone(),
            rewards: store.clone(),
            claims: store.clone(),
            heartbeats: store,
            oracle,
            clock,
        }
    }
}

/// The operations exposed to request handlers and the CLI.
pub struct RewardEngine {
    cycles: Arc<CycleService>,
    claims: ClaimService,
    sampler: Arc<UptimeSampler>,
    operators: Arc<dyn OperatorRepository>,
    rewards: Arc<dyn RewardRepository>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl RewardEngine {
    /// Wires the cycle, claim and scheduling services from `parts`.
    pub fn new(parts: EngineParts, config: &Config) -> Self {
        let sampler = Arc::new(UptimeSampler::new(parts.heartbeats));
        let store_timeout = config.engine.store_timeout();

        let cycles = CycleService::new(
            parts.operators.clone(),
            parts.ledger,
            parts.rewards.clone(),
            sampler.clone(),
            parts.oracle,
        )
        .with_store_timeout(store_timeout)
        .with_concurrency(config.engine.delegator_concurrency);

        let claims = ClaimService::new(parts.claims, parts.rewards.clone(), parts.clock.clone())
            .require_transactions(config.claims.require_transactions)
            .with_store_timeout(store_timeout);

        Self {
            cycles: Arc::new(cycles),
            claims,
            sampler,
            operators: parts.operators,
            rewards: parts.rewards,
            clock: parts.clock,
            settings: SchedulerSettings::from(config),
        }
    }

    /// Runs the cycle for today's id, or for `cycle_id` when given.
    pub async fn run_cycle(&self, cycle_id: Option<CycleId>) -> Result<CycleOutcome> {
        let now = self.clock.now();
        let ctx = match cycle_id {
            Some(id) => CycleContext::manual(id, now),
            None => CycleContext::scheduled(now, self.settings.timezone),
        };
        self.cycles.run(&ctx).await
    }

    /// Claims a single unclaimed record owned by `address`.
    pub async fn claim_one(&self, reward_id: Uuid, address: &Address) -> Result<RewardRecord> {
        self.claims.claim_one(reward_id, address).await
    }

    /// Claims everything `address` has not claimed yet.
    pub async fn claim_all(&self, address: &Address) -> Result<ClaimReceipt> {
        self.claims.claim_all(address).await
    }

    /// All-time and weekly uptime of a known operator.
    pub async fn get_uptime(&self, address: &Address) -> Result<Uptime> {
        let operator = self.operator(address).await?;
        self.sampler
            .compute_uptime(address, operator.created_at, self.clock.now())
            .await
    }

    /// Uptime plus interval counts for a known operator.
    pub async fn uptime_report(&self, address: &Address) -> Result<UptimeReport> {
        let operator = self.operator(address).await?;
        self.sampler
            .report(address, operator.created_at, self.clock.now())
            .await
    }

    /// Points `address` has claimed so far.
    pub async fn user_claimed_points(&self, address: &Address) -> Result<i64> {
        self.claims.user_claimed_points(address).await
    }

    /// Every reward record of `address`, claimed or not.
    pub async fn rewards_for(&self, address: &Address) -> Result<Vec<RewardRecord>> {
        self.claims.rewards_for(address).await
    }

    /// Summary of a committed cycle.
    pub async fn get_summary(&self, cycle_id: &CycleId) -> Result<RewardSummary> {
        self.rewards
            .find_summary(cycle_id)
            .await?
            .ok_or_else(|| RewardError::not_found(format!("no summary for cycle {}", cycle_id)))
    }

    /// Daily scheduler sharing this engine's cycle service.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.cycles.clone(),
            self.sampler.clone(),
            self.clock.clone(),
            self.settings.clone(),
        )
    }

    async fn operator(&self, address: &Address) -> Result<Operator> {
        self.operators
            .get_operator(address)
            .await?
            .ok_or_else(|| RewardError::not_found(format!("unknown operator {}", address)))
    }
}
