use std::fmt;

use thiserror::Error;

use crate::address::Address;
use crate::reward::CycleId;

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rewards for cycle {0} have already been processed")]
    AlreadyProcessed(CycleId),

    #[error("Cycle {cycle_id} has {claimed} claimed reward records but no summary; manual reconciliation required")]
    ReconciliationRequired { cycle_id: CycleId, claimed: usize },

    #[error("Transient storage error: {0}")]
    TransientStorage(String),
}

impl RewardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RewardError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RewardError::NotFound(msg.into())
    }

    /// Transient store failure; the only retryable kind.
    pub fn storage(msg: impl fmt::Display) -> Self {
        RewardError::TransientStorage(msg.to_string())
    }

    /// Only storage hiccups are worth another attempt; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RewardError::TransientStorage(_))
    }
}

impl From<sqlx::Error> for RewardError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RewardError::NotFound("row not found".to_string()),
            other => RewardError::TransientStorage(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for RewardError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RewardError::TransientStorage(format!("migration failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, RewardError>;

/// A delegation claimed more NFTs than the delegator verifiably holds.
/// Handled by capping; never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InconsistentBalance {
    pub delegator: Address,
    pub operator: Address,
    pub claimed: u64,
    pub verified: u64,
}

impl fmt::Display for InconsistentBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delegator {} claims {} NFTs to {} but holds {}; capped",
            self.delegator, self.claimed, self.operator, self.verified
        )
    }
}
