//! In-process store implementing every repository seam. Can be built without
//! transaction support and armed with one-shot faults.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use performance_monitoring::window::interval_bucket;
use performance_monitoring::{HeartbeatRepository, TimeWindow};
use shared_models::{
    Address, CycleId, Delegation, Direction, Heartbeat, Operator, Result, RewardError,
    RewardRecord, RewardSummary, Timestamped, User, UserType,
};
use uuid::Uuid;

use super::traits::{
    ClaimRepository, ClaimSelection, DelegationLedger, OperatorRepository, RewardRepository,
    StorageCapabilities,
};

/// Places where an armed fault makes the store fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListOperators,
    InsertRewards,
    InsertSummary,
    CommitCycle,
    /// Inside an atomic claim, after the records were flipped and before the
    /// user is credited.
    ClaimCredit,
    MarkClaimed,
    CreditUser,
}

#[derive(Debug, Default, Clone)]
struct State {
    operators: BTreeMap<Address, Operator>,
    delegations: BTreeMap<(Address, Address), Delegation>,
    heartbeats: Vec<Heartbeat>,
    rewards: Vec<RewardRecord>,
    summaries: BTreeMap<CycleId, RewardSummary>,
    users: BTreeMap<Address, User>,
}

impl State {
    fn claimable(&self, address: &Address, selection: ClaimSelection) -> Result<Vec<usize>> {
        let owned = |r: &RewardRecord| &r.address == address && !r.claimed;
        match selection {
            ClaimSelection::One(id) => self
                .rewards
                .iter()
                .position(|r| r.id == id && owned(r))
                .map(|i| vec![i])
                .ok_or_else(|| RewardError::not_found(format!("unclaimed reward {} for {}", id, address))),
            ClaimSelection::AllUnclaimed => Ok(self
                .rewards
                .iter()
                .enumerate()
                .filter(|(_, r)| owned(r))
                .map(|(i, _)| i)
                .collect()),
        }
    }

    fn flip(&mut self, indices: &[usize], at: DateTime<Utc>) -> Vec<RewardRecord> {
        indices
            .iter()
            .map(|&i| {
                let record = &mut self.rewards[i];
                record.mark_claimed(at);
                record.clone()
            })
            .collect()
    }

    fn credit(&mut self, address: &Address, user_type: UserType, points: i64, at: DateTime<Utc>) -> User {
        let user = self
            .users
            .entry(address.clone())
            .or_insert_with(|| User::new(address.clone(), user_type, at));
        user.credit(points, at);
        user.clone()
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<HashMap<FailPoint, u32>>,
    transactional: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that supports atomic cycle commits and claims.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(HashMap::new()),
            transactional: true,
        }
    }

    /// A store that cannot group writes, forcing the best-effort paths.
    pub fn without_transactions() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    /// Makes the next operation at `point` fail with a transient error.
    pub fn fail_once(&self, point: FailPoint) {
        self.fail_times(point, 1);
    }

    pub fn fail_times(&self, point: FailPoint, times: u32) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        *faults.entry(point).or_insert(0) += times;
    }

    /// Inserts or replaces the operator keyed by its address.
    pub fn upsert_operator(&self, operator: Operator) {
        self.state().operators.insert(operator.address.clone(), operator);
    }

    /// Inserts or replaces the delegation for its `(from, to)` pair.
    pub fn upsert_delegation(&self, delegation: Delegation) {
        self.state().delegations.insert(delegation.key(), delegation);
    }

    pub fn record_heartbeat(&self, heartbeat: Heartbeat) {
        self.state().heartbeats.push(heartbeat);
    }

    /// Every stored record, in insertion order.
    pub fn rewards(&self) -> Vec<RewardRecord> {
        self.state().rewards.clone()
    }

    /// Committed cycle summaries, ordered by cycle id.
    pub fn summaries(&self) -> Vec<RewardSummary> {
        self.state().summaries.values().cloned().collect()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.state().heartbeats.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RewardError::storage(format!("injected failure at {:?}", point)))
            }
            _ => Ok(()),
        }
    }

    fn require_transactions(&self) -> Result<()> {
        if self.transactional {
            Ok(())
        } else {
            Err(RewardError::validation("store does not support transactions"))
        }
    }
}

impl StorageCapabilities for MemoryStore {
    fn supports_transactions(&self) -> bool {
        self.transactional
    }
}

#[async_trait]
impl OperatorRepository for MemoryStore {
    async fn list_operators(&self) -> Result<Vec<Operator>> {
        self.trip(FailPoint::ListOperators)?;
        Ok(self.state().operators.values().cloned().collect())
    }

    async fn get_operator(&self, address: &Address) -> Result<Option<Operator>> {
        Ok(self.state().operators.get(address).cloned())
    }
}

#[async_trait]
impl DelegationLedger for MemoryStore {
    async fn list_delegations(&self, address: &Address, direction: Direction) -> Result<Vec<Delegation>> {
        let state = self.state();
        Ok(state
            .delegations
            .values()
            .filter(|d| match direction {
                Direction::Outgoing => &d.from_address == address,
                Direction::Incoming => &d.to_address == address,
            })
            .cloned()
            .collect())
    }

    async fn list_delegators(&self) -> Result<Vec<Address>> {
        let state = self.state();
        let delegators: BTreeSet<Address> = state
            .delegations
            .values()
            .map(|d| d.from_address.clone())
            .collect();
        Ok(delegators.into_iter().collect())
    }
}

#[async_trait]
impl RewardRepository for MemoryStore {
    async fn find_summary(&self, cycle_id: &CycleId) -> Result<Option<RewardSummary>> {
        Ok(self.state().summaries.get(cycle_id).cloned())
    }

    async fn list_cycle_records(&self, cycle_id: &CycleId) -> Result<Vec<RewardRecord>> {
        Ok(self
            .state()
            .rewards
            .iter()
            .filter(|r| &r.cycle_id == cycle_id)
            .cloned()
            .collect())
    }

    async fn delete_unclaimed_cycle_records(&self, cycle_id: &CycleId) -> Result<u64> {
        let mut state = self.state();
        let before = state.rewards.len();
        state.rewards.retain(|r| &r.cycle_id != cycle_id || r.claimed);
        Ok((before - state.rewards.len()) as u64)
    }

    async fn insert_rewards(&self, records: &[RewardRecord]) -> Result<()> {
        self.trip(FailPoint::InsertRewards)?;
        self.state().rewards.extend_from_slice(records);
        Ok(())
    }

    async fn insert_summary(&self, summary: &RewardSummary) -> Result<()> {
        self.trip(FailPoint::InsertSummary)?;
        let mut state = self.state();
        if state.summaries.contains_key(&summary.cycle_id) {
            return Err(RewardError::AlreadyProcessed(summary.cycle_id.clone()));
        }
        state.summaries.insert(summary.cycle_id.clone(), summary.clone());
        Ok(())
    }

    async fn commit_cycle(&self, records: &[RewardRecord], summary: &RewardSummary) -> Result<()> {
        self.require_transactions()?;
        self.trip(FailPoint::CommitCycle)?;
        let mut state = self.state();
        if state.summaries.contains_key(&summary.cycle_id) {
            return Err(RewardError::AlreadyProcessed(summary.cycle_id.clone()));
        }
        state.rewards.extend_from_slice(records);
        state.summaries.insert(summary.cycle_id.clone(), summary.clone());
        Ok(())
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardRecord>> {
        Ok(self.state().rewards.iter().find(|r| r.id == id).cloned())
    }

    async fn list_rewards_by_address(&self, address: &Address) -> Result<Vec<RewardRecord>> {
        let mut records: Vec<RewardRecord> = self
            .state()
            .rewards
            .iter()
            .filter(|r| &r.address == address)
            .cloned()
            .collect();
        records.sort_by_key(|r| Reverse(r.timestamp()));
        Ok(records)
    }
}

#[async_trait]
impl ClaimRepository for MemoryStore {
    async fn claim_atomic(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>> {
        self.require_transactions()?;
        let mut state = self.state();
        let indices = state.claimable(address, selection)?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        // Work on a copy; the live state is only replaced once every step succeeded.
        let mut draft = state.clone();
        let claimed = draft.flip(&indices, at);
        self.trip(FailPoint::ClaimCredit)?;
        let points = claimed.iter().map(|r| r.points).sum();
        draft.credit(address, claimed[0].reward_type.into(), points, at);

        *state = draft;
        Ok(claimed)
    }

    async fn mark_claimed(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>> {
        self.trip(FailPoint::MarkClaimed)?;
        let mut state = self.state();
        let indices = state.claimable(address, selection)?;
        Ok(state.flip(&indices, at))
    }

    async fn credit_user(
        &self,
        address: &Address,
        user_type: UserType,
        points: i64,
        at: DateTime<Utc>,
    ) -> Result<User> {
        self.trip(FailPoint::CreditUser)?;
        Ok(self.state().credit(address, user_type, points, at))
    }

    async fn get_user(&self, address: &Address) -> Result<Option<User>> {
        Ok(self.state().users.get(address).cloned())
    }
}

#[async_trait]
impl HeartbeatRepository for MemoryStore {
    async fn count_active_intervals(
        &self,
        address: &Address,
        window: TimeWindow,
        interval: Duration,
    ) -> Result<u64> {
        let state = self.state();
        let buckets: HashSet<i64> = state
            .heartbeats
            .iter()
            .filter(|h| &h.client_address == address && window.contains(h.timestamp))
            .map(|h| interval_bucket(h.timestamp, interval))
            .collect();
        Ok(buckets.len() as u64)
    }

    async fn total_duration_secs(&self, address: &Address, window: TimeWindow) -> Result<i64> {
        Ok(self
            .state()
            .heartbeats
            .iter()
            .filter(|h| &h.client_address == address && window.contains(h.timestamp))
            .map(|h| h.duration_secs)
            .sum())
    }

    async fn last_heartbeat(&self, address: &Address) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .state()
            .heartbeats
            .iter()
            .filter(|h| &h.client_address == address)
            .map(|h| h.timestamp())
            .max())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state();
        let before = state.heartbeats.len();
        state.heartbeats.retain(|h| h.timestamp >= cutoff);
        Ok((before - state.heartbeats.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_models::{CommissionRate, RewardType};

    fn address(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn record(owner: u8, points: i64, created_at: DateTime<Utc>) -> RewardRecord {
        RewardRecord {
            id: Uuid::new_v4(),
            address: address(owner),
            points,
            cycle_id: CycleId::parse("CYCLE_2026-05-01").unwrap(),
            reward_type: RewardType::Delegator,
            claimed: false,
            claimed_at: None,
            created_at,
            nft_count: 1,
            delegation_count: 1,
            commission_rate: 0.0,
            operator_address: None,
        }
    }

    #[tokio::test]
    async fn delegations_are_unique_per_pair() {
        let store = MemoryStore::new();
        for amount in [1, 4] {
            store.upsert_delegation(Delegation {
                from_address: address(1),
                to_address: address(2),
                amount,
                commission_rate: CommissionRate::ZERO,
                timestamp: Utc::now(),
            });
        }

        let outgoing = store.list_delegations(&address(1), Direction::Outgoing).await.unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].amount, 4);
        assert_eq!(store.list_delegators().await.unwrap(), vec![address(1)]);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let older = record(1, 10, now - Duration::days(1));
        let newer = record(1, 20, now);
        store.insert_rewards(&[older.clone(), newer.clone()]).await.unwrap();

        let history = store.list_rewards_by_address(&address(1)).await.unwrap();
        assert_eq!(history, vec![newer, older]);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let store = MemoryStore::new();
        store.fail_once(FailPoint::ListOperators);

        assert!(store.list_operators().await.unwrap_err().is_retryable());
        assert!(store.list_operators().await.is_ok());
    }

    #[tokio::test]
    async fn atomic_claim_requires_transactions() {
        let store = MemoryStore::without_transactions();
        let err = store
            .claim_atomic(&address(1), ClaimSelection::AllUnclaimed, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RewardError::Validation(_)));
    }
}
