use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt, TryStreamExt};
use performance_monitoring::UptimeSampler;
use shared_models::{
    Address, CycleId, Direction, Operator, Result, RewardError, RewardRecord, RewardSummary,
    RewardType,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::{self, DelegatorAllocation, OperatorStanding};
use crate::oracle::BalanceOracle;
use crate::repositories::traits::{DelegationLedger, OperatorRepository, RewardRepository};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DELEGATOR_CONCURRENCY: usize = 8;

/// Daily cycle id: the calendar date of `now` in the reference timezone.
pub fn cycle_id_for(now: DateTime<Utc>, timezone: Tz) -> CycleId {
    CycleId::for_date(now.with_timezone(&timezone).date_naive())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleContext {
    pub cycle_id: CycleId,
    /// Reference instant for uptime sampling and record timestamps.
    pub now: DateTime<Utc>,
}

impl CycleContext {
    /// Context for the cycle of the calendar day containing `now`.
    pub fn scheduled(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            cycle_id: cycle_id_for(now, timezone),
            now,
        }
    }

    /// Context for an operator-supplied cycle id.
    pub fn manual(cycle_id: CycleId, now: DateTime<Utc>) -> Self {
        Self { cycle_id, now }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Running,
    Committed,
    Aborted,
}

/// Phase bookkeeping for one run. Transitions only move forward.
#[derive(Debug)]
pub struct CycleRun {
    cycle_id: CycleId,
    phase: CyclePhase,
}

impl CycleRun {
    pub fn new(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Idle to running.
    pub fn begin(&mut self) {
        if self.phase == CyclePhase::Idle {
            self.phase = CyclePhase::Running;
            info!(cycle_id = %self.cycle_id, "reward cycle running");
        }
    }

    pub fn commit(&mut self, summary: &RewardSummary) {
        if self.phase == CyclePhase::Running {
            self.phase = CyclePhase::Committed;
            metrics::increment_counter!("rewards_cycles_committed_total");
            info!(
                cycle_id = %self.cycle_id,
                total_rewards = summary.total_rewards,
                total_points = summary.total_points,
                operator_rewards = summary.operator_rewards,
                delegator_rewards = summary.delegator_rewards,
                "reward cycle committed"
            );
        }
    }

    /// Records a failed run. A committed run stays committed.
    pub fn abort(&mut self, reason: &RewardError) {
        if matches!(self.phase, CyclePhase::Idle | CyclePhase::Running) {
            self.phase = CyclePhase::Aborted;
            metrics::increment_counter!("rewards_cycles_aborted_total");
            match reason {
                RewardError::AlreadyProcessed(_) => {
                    info!(cycle_id = %self.cycle_id, "reward cycle already processed")
                }
                RewardError::ReconciliationRequired { .. } => {
                    error!(cycle_id = %self.cycle_id, error = %reason, "reward cycle needs reconciliation")
                }
                _ => warn!(cycle_id = %self.cycle_id, error = %reason, "reward cycle aborted"),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub summary: RewardSummary,
    /// Delegations capped at the delegator's verified balance.
    pub capped_delegations: usize,
    /// Unclaimed records of an earlier interrupted run that were discarded.
    pub discarded_orphans: u64,
}

/// Operator facts gathered once per cycle.
struct OperatorView {
    operator: Operator,
    standing: OperatorStanding,
    incoming: u64,
}

/// Computes and persists one cycle of rewards, at most once per cycle id.
pub struct CycleService {
    operators: Arc<dyn OperatorRepository>,
    ledger: Arc<dyn DelegationLedger>,
    rewards: Arc<dyn RewardRepository>,
    sampler: Arc<UptimeSampler>,
    oracle: Arc<dyn BalanceOracle>,
    store_timeout: Duration,
    concurrency: usize,
    // Held across a whole run so overlapping runs cannot both pass the
    // summary check before either writes.
    run_lock: Mutex<()>,
}

impl CycleService {
    /// Builds a service with the default store timeout and delegator concurrency.
    pub fn new(
        operators: Arc<dyn OperatorRepository>,
        ledger: Arc<dyn DelegationLedger>,
        rewards: Arc<dyn RewardRepository>,
        sampler: Arc<UptimeSampler>,
        oracle: Arc<dyn BalanceOracle>,
    ) -> Self {
        Self {
            operators,
            ledger,
            rewards,
            sampler,
            oracle,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            concurrency: DEFAULT_DELEGATOR_CONCURRENCY,
            run_lock: Mutex::new(()),
        }
    }

    /// Upper bound for each individual store or oracle call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Delegators whose balances are fetched at once; at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs the cycle named by `ctx`. Runs are serialized; a run that waited
    /// on a finished run of the same id fails with `AlreadyProcessed`.
    pub async fn run(&self, ctx: &CycleContext) -> Result<CycleOutcome> {
        let _guard = self.run_lock.lock().await;
        let mut run = CycleRun::new(ctx.cycle_id.clone());
        run.begin();

        match self.execute(ctx).await {
            Ok(outcome) => {
                run.commit(&outcome.summary);
                Ok(outcome)
            }
            Err(err) => {
                run.abort(&err);
                Err(err)
            }
        }
    }

    async fn execute(&self, ctx: &CycleContext) -> Result<CycleOutcome> {
        let cycle_id = &ctx.cycle_id;

        if self.call(self.rewards.find_summary(cycle_id)).await?.is_some() {
            return Err(RewardError::AlreadyProcessed(cycle_id.clone()));
        }
        let discarded_orphans = self.reconcile(cycle_id).await?;

        let views = self.load_operators(ctx.now).await?;
        let standings: HashMap<Address, OperatorStanding> = views
            .iter()
            .map(|v| (v.standing.address.clone(), v.standing.clone()))
            .collect();

        // Delegator pass. Commission owed to each operator is collected on the side.
        let allocations = self.allocate_delegators(&standings).await?;
        let mut commissions: HashMap<Address, i64> = HashMap::new();
        let mut capped_delegations = 0;
        let mut records = Vec::new();

        for (delegator, allocation) in allocations {
            capped_delegations += allocation.capped.len();
            for (operator, commission) in &allocation.commissions {
                *commissions.entry(operator.clone()).or_insert(0) += commission;
            }
            if !allocation.is_empty() {
                records.push(delegator_record(ctx, delegator, &allocation));
            }
        }

        // Operator pass, now that every commission contribution is known.
        for view in views.iter().filter(|v| v.standing.is_eligible()) {
            let commission = commissions.get(&view.operator.address).copied().unwrap_or(0);
            records.push(operator_record(ctx, view, commission));
        }

        let mut summary = RewardSummary::empty(cycle_id.clone(), ctx.now);
        for record in &records {
            summary.record(record);
        }

        self.persist(&records, &summary).await?;

        Ok(CycleOutcome {
            summary,
            capped_delegations,
            discarded_orphans,
        })
    }

    /// Handles records left behind by a run that died before its summary
    /// insert. Unclaimed orphans are discarded so the cycle can be recomputed;
    /// claimed ones cannot be undone automatically.
    async fn reconcile(&self, cycle_id: &CycleId) -> Result<u64> {
        let orphans = self.call(self.rewards.list_cycle_records(cycle_id)).await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let claimed = orphans.iter().filter(|r| r.claimed).count();
        if claimed > 0 {
            return Err(RewardError::ReconciliationRequired {
                cycle_id: cycle_id.clone(),
                claimed,
            });
        }

        let removed = self
            .call(self.rewards.delete_unclaimed_cycle_records(cycle_id))
            .await?;
        warn!(%cycle_id, removed, "discarded orphan reward records from an interrupted run");
        Ok(removed)
    }

    async fn load_operators(&self, now: DateTime<Utc>) -> Result<Vec<OperatorView>> {
        let operators = self.call(self.operators.list_operators()).await?;
        let mut views = Vec::with_capacity(operators.len());

        for operator in operators {
            let uptime = self
                .call(self.sampler.all_time_uptime(&operator.address, operator.created_at, now))
                .await?;
            let incoming = self
                .call(self.ledger.list_delegations(&operator.address, Direction::Incoming))
                .await?;
            let delegated_total = incoming
                .iter()
                .map(|d| d.amount)
                .fold(0u64, u64::saturating_add);

            let standing = OperatorStanding {
                address: operator.address.clone(),
                uptime,
                commission_rate: operator.commission_rate,
                delegated_total,
            };
            if !standing.is_eligible() {
                debug!(address = %operator.address, uptime, delegated_total, "operator not eligible");
            }

            views.push(OperatorView {
                operator,
                standing,
                incoming: incoming.len() as u64,
            });
        }

        Ok(views)
    }

    async fn allocate_delegators(
        &self,
        standings: &HashMap<Address, OperatorStanding>,
    ) -> Result<Vec<(Address, DelegatorAllocation)>> {
        let delegators = self.call(self.ledger.list_delegators()).await?;

        // `buffered` keeps delegator order, so record order is deterministic.
        stream::iter(delegators)
            .map(move |delegator| async move {
                let allocation = self.allocate_one(&delegator, standings).await?;
                Ok::<_, RewardError>((delegator, allocation))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn allocate_one(
        &self,
        delegator: &Address,
        standings: &HashMap<Address, OperatorStanding>,
    ) -> Result<DelegatorAllocation> {
        let delegations = self
            .call(self.ledger.list_delegations(delegator, Direction::Outgoing))
            .await?;
        if delegations.is_empty() {
            return Ok(DelegatorAllocation::default());
        }

        let verified = self.call(self.oracle.verified_balance(delegator)).await?;
        let allocation = allocator::allocate_delegator(&delegations, standings, verified);

        for warning in &allocation.capped {
            warn!(
                delegator = %warning.delegator,
                operator = %warning.operator,
                claimed = warning.claimed,
                verified = warning.verified,
                "delegation exceeds verified balance; capped"
            );
        }
        Ok(allocation)
    }

    async fn persist(&self, records: &[RewardRecord], summary: &RewardSummary) -> Result<()> {
        if self.rewards.supports_transactions() {
            self.call(self.rewards.commit_cycle(records, summary)).await?;
        } else {
            // Summary last: it is the commit point, and reconcile() cleans up
            // if we die in between.
            self.call(self.rewards.insert_rewards(records)).await?;
            self.call(self.rewards.insert_summary(summary)).await?;
        }

        let written = count_by_type(records);
        for (reward_type, count) in written {
            metrics::counter!("rewards_records_written_total", count, "type" => reward_type);
        }
        Ok(())
    }

    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| RewardError::storage(format!("store call exceeded {:?}", self.store_timeout)))?
    }
}

fn delegator_record(ctx: &CycleContext, delegator: Address, allocation: &DelegatorAllocation) -> RewardRecord {
    RewardRecord {
        id: Uuid::new_v4(),
        address: delegator,
        points: allocation.points,
        cycle_id: ctx.cycle_id.clone(),
        reward_type: RewardType::Delegator,
        claimed: false,
        claimed_at: None,
        created_at: ctx.now,
        nft_count: allocation.nft_count,
        delegation_count: allocation.delegation_count,
        commission_rate: allocation.effective_commission_rate(),
        operator_address: None,
    }
}

fn operator_record(ctx: &CycleContext, view: &OperatorView, commission: i64) -> RewardRecord {
    let operator = &view.operator;
    RewardRecord {
        id: Uuid::new_v4(),
        address: operator.payout_address().clone(),
        points: allocator::operator_points(commission),
        cycle_id: ctx.cycle_id.clone(),
        reward_type: RewardType::Operator,
        claimed: false,
        claimed_at: None,
        created_at: ctx.now,
        nft_count: operator.nft_amount,
        delegation_count: view.incoming,
        commission_rate: operator.commission_rate.as_percent(),
        operator_address: operator
            .reward_collector_address
            .as_ref()
            .map(|_| operator.address.clone()),
    }
}

fn count_by_type(records: &[RewardRecord]) -> BTreeMap<&'static str, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.reward_type.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cycle(raw: &str) -> CycleId {
        CycleId::parse(raw).unwrap()
    }

    #[test]
    fn cycle_id_uses_reference_timezone() {
        // 22:30 UTC on the 15th is already the 16th in Jerusalem.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 22, 30, 0).unwrap();
        assert_eq!(cycle_id_for(now, chrono_tz::Asia::Jerusalem), cycle("CYCLE_2026-10-16"));
        assert_eq!(cycle_id_for(now, chrono_tz::UTC), cycle("CYCLE_2026-10-15"));
    }

    #[test]
    fn phases_only_move_forward() {
        let summary = RewardSummary::empty(cycle("CYCLE_2026-01-01"), Utc::now());
        let mut run = CycleRun::new(cycle("CYCLE_2026-01-01"));
        assert_eq!(run.phase(), CyclePhase::Idle);

        run.begin();
        assert_eq!(run.phase(), CyclePhase::Running);

        run.commit(&summary);
        run.abort(&RewardError::storage("late failure"));
        assert_eq!(run.phase(), CyclePhase::Committed);
    }

    #[test]
    fn idle_run_can_abort() {
        let mut run = CycleRun::new(cycle("manual"));
        run.abort(&RewardError::validation("bad input"));
        run.begin();
        assert_eq!(run.phase(), CyclePhase::Aborted);
    }
}
