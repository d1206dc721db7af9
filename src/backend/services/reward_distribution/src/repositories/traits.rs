use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_models::{
    Address, CycleId, Delegation, Direction, Operator, Result, RewardRecord, RewardSummary, User,
    UserType,
};
use uuid::Uuid;

/// Whether writes spanning several rows can be grouped into one atomic unit.
pub trait StorageCapabilities {
    fn supports_transactions(&self) -> bool;
}

#[async_trait]
pub trait OperatorRepository: Send + Sync {
    async fn list_operators(&self) -> Result<Vec<Operator>>;
    async fn get_operator(&self, address: &Address) -> Result<Option<Operator>>;
}

/// Canonical record of who delegates to whom. "Delegators of X" and
/// "operators of Y" are always answered from here.
#[async_trait]
pub trait DelegationLedger: Send + Sync {
    async fn list_delegations(&self, address: &Address, direction: Direction) -> Result<Vec<Delegation>>;
    /// Every address with at least one outgoing delegation.
    async fn list_delegators(&self) -> Result<Vec<Address>>;
}

#[async_trait]
pub trait RewardRepository: StorageCapabilities + Send + Sync {
    async fn find_summary(&self, cycle_id: &CycleId) -> Result<Option<RewardSummary>>;
    async fn list_cycle_records(&self, cycle_id: &CycleId) -> Result<Vec<RewardRecord>>;
    async fn delete_unclaimed_cycle_records(&self, cycle_id: &CycleId) -> Result<u64>;
    async fn insert_rewards(&self, records: &[RewardRecord]) -> Result<()>;
    /// Fails with `AlreadyProcessed` if the cycle already has a summary.
    async fn insert_summary(&self, summary: &RewardSummary) -> Result<()>;
    /// Records and summary in one atomic unit. Only valid when
    /// `supports_transactions` is true.
    async fn commit_cycle(&self, records: &[RewardRecord], summary: &RewardSummary) -> Result<()>;
    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardRecord>>;
    /// Newest first.
    async fn list_rewards_by_address(&self, address: &Address) -> Result<Vec<RewardRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimSelection {
    One(Uuid),
    AllUnclaimed,
}

#[async_trait]
pub trait ClaimRepository: StorageCapabilities + Send + Sync {
    /// Flips the selected unclaimed records of `address` and credits their
    /// points to the user in one atomic unit. Returns the flipped records.
    async fn claim_atomic(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>>;

    /// Flips the selected unclaimed records without touching the user row.
    async fn mark_claimed(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>>;

    /// Adds `points` to the user's total, creating the user if needed.
    async fn credit_user(
        &self,
        address: &Address,
        user_type: UserType,
        points: i64,
        at: DateTime<Utc>,
    ) -> Result<User>;

    async fn get_user(&self, address: &Address) -> Result<Option<User>>;
}
