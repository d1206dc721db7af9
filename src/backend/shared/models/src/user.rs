use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Result, RewardError};
use crate::reward::RewardType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserType {
    Operator,
    Delegator,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Operator => "OPERATOR",
            UserType::Delegator => "DELEGATOR",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "OPERATOR" => Ok(UserType::Operator),
            "DELEGATOR" => Ok(UserType::Delegator),
            other => Err(RewardError::storage(format!("unknown user type {:?}", other))),
        }
    }
}

impl From<RewardType> for UserType {
    fn from(reward_type: RewardType) -> Self {
        match reward_type {
            RewardType::Operator => UserType::Operator,
            RewardType::Delegator => UserType::Delegator,
        }
    }
}

/// Cumulative claim ledger for one address. `total_claimed_points` equals the
/// sum of that address's claimed reward records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub address: Address,
    pub user_type: UserType,
    pub total_claimed_points: i64,
    pub last_claim_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(address: Address, user_type: UserType, now: DateTime<Utc>) -> Self {
        Self {
            address,
            user_type,
            total_claimed_points: 0,
            last_claim_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds claimed points and stamps the claim time.
    pub fn credit(&mut self, points: i64, at: DateTime<Utc>) {
        self.total_claimed_points += points;
        self.last_claim_time = Some(at);
        self.updated_at = at;
    }
}
