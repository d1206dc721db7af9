use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared_models::{Address, Result, RewardError, RewardRecord};
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::repositories::traits::{ClaimRepository, ClaimSelection, RewardRepository};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub claimed_count: usize,
    pub total_points: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Records and user total change in one transaction.
    Transactional,
    /// Sequential writes; a failure in between leaves records claimed but
    /// not credited.
    BestEffort,
}

impl ClaimMode {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimMode::Transactional => "transactional",
            ClaimMode::BestEffort => "best_effort",
        }
    }
}

pub struct ClaimService {
    claims: Arc<dyn ClaimRepository>,
    rewards: Arc<dyn RewardRepository>,
    clock: Arc<dyn Clock>,
    require_transactions: bool,
    store_timeout: Duration,
}

impl ClaimService {
    pub fn new(
        claims: Arc<dyn ClaimRepository>,
        rewards: Arc<dyn RewardRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            claims,
            rewards,
            clock,
            require_transactions: false,
            store_timeout: Duration::from_secs(10),
        }
    }

    /// Refuse claims instead of falling back to best-effort writes.
    pub fn require_transactions(mut self, required: bool) -> Self {
        self.require_transactions = required;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// How claims will be written against the configured store.
    pub fn mode(&self) -> Result<ClaimMode> {
        if self.claims.supports_transactions() {
            Ok(ClaimMode::Transactional)
        } else if self.require_transactions {
            Err(RewardError::validation(
                "store cannot claim atomically and best-effort claims are disabled",
            ))
        } else {
            Ok(ClaimMode::BestEffort)
        }
    }

    /// Claims one unclaimed record owned by `address`.
    pub async fn claim_one(&self, reward_id: Uuid, address: &Address) -> Result<RewardRecord> {
        let claimed = self.claim(address, ClaimSelection::One(reward_id)).await?;
        claimed
            .into_iter()
            .next()
            .ok_or_else(|| RewardError::not_found(format!("unclaimed reward {} for {}", reward_id, address)))
    }

    /// Claims every unclaimed record of `address`. Nothing to claim is not an error.
    pub async fn claim_all(&self, address: &Address) -> Result<ClaimReceipt> {
        let claimed = self.claim(address, ClaimSelection::AllUnclaimed).await?;
        Ok(ClaimReceipt {
            claimed_count: claimed.len(),
            total_points: claimed.iter().map(|r| r.points).sum(),
        })
    }

    /// Cumulative claimed points; zero for an address that never claimed.
    pub async fn user_claimed_points(&self, address: &Address) -> Result<i64> {
        let user = self.call(self.claims.get_user(address)).await?;
        Ok(user.map(|u| u.total_claimed_points).unwrap_or(0))
    }

    /// Every record of `address`, claimed or not.
    pub async fn rewards_for(&self, address: &Address) -> Result<Vec<RewardRecord>> {
        self.call(self.rewards.list_rewards_by_address(address)).await
    }

    async fn claim(&self, address: &Address, selection: ClaimSelection) -> Result<Vec<RewardRecord>> {
        let mode = self.mode()?;
        let at = self.clock.now();

        let claimed = match mode {
            ClaimMode::Transactional => {
                self.call(self.claims.claim_atomic(address, selection, at)).await?
            }
            ClaimMode::BestEffort => self.claim_best_effort(address, selection, at).await?,
        };

        if !claimed.is_empty() {
            let points: i64 = claimed.iter().map(|r| r.points).sum();
            metrics::counter!("rewards_claims_total", claimed.len() as u64, "mode" => mode.as_str());
            info!(%address, records = claimed.len(), points, mode = mode.as_str(), "rewards claimed");
        }
        Ok(claimed)
    }

    async fn claim_best_effort(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<RewardRecord>> {
        let claimed = self.call(self.claims.mark_claimed(address, selection, at)).await?;
        if claimed.is_empty() {
            return Ok(claimed);
        }

        let points: i64 = claimed.iter().map(|r| r.points).sum();
        let user_type = claimed[0].reward_type.into();
        let credit = self
            .call(self.claims.credit_user(address, user_type, points, at))
            .await;

        if let Err(err) = credit {
            let ids: Vec<Uuid> = claimed.iter().map(|r| r.id).collect();
            error!(
                %address,
                points,
                records = ?ids,
                error = %err,
                "data integrity: records marked claimed but user total not credited; manual reconciliation required"
            );
            return Err(err);
        }
        Ok(claimed)
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
