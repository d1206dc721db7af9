use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::error::{Result, RewardError};
use crate::Timestamped;

const CYCLE_PREFIX: &str = "CYCLE_";
const MAX_CYCLE_ID_LEN: usize = 64;

/// Identifier of one reward cycle, normally `CYCLE_YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CycleId(String);

impl CycleId {
    /// `CYCLE_YYYY-MM-DD` for a scheduled run.
    pub fn for_date(date: NaiveDate) -> Self {
        Self(format!("{}{}", CYCLE_PREFIX, date.format("%Y-%m-%d")))
    }

    /// Accepts an explicit id for out-of-band runs.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_CYCLE_ID_LEN
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RewardError::validation(format!(
                "cycle id {:?} must be 1-{} characters of [A-Za-z0-9_-]",
                raw, MAX_CYCLE_ID_LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CycleId {
    type Error = RewardError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CycleId> for String {
    fn from(id: CycleId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RewardType {
    Operator,
    Delegator,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Operator => "OPERATOR",
            RewardType::Delegator => "DELEGATOR",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "OPERATOR" => Ok(RewardType::Operator),
            "DELEGATOR" => Ok(RewardType::Delegator),
            other => Err(RewardError::storage(format!("unknown reward type {:?}", other))),
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points granted to one address for one cycle. Immutable apart from the
/// one-way `claimed` transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: Uuid,
    pub address: Address,
    pub points: i64,
    pub cycle_id: CycleId,
    pub reward_type: RewardType,
    pub claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub nft_count: u64,
    pub delegation_count: u64,
    /// Operator records carry the operator's rate; delegator records carry
    /// the effective rate across their eligible delegations.
    pub commission_rate: f64,
    /// Operator that earned an OPERATOR record, when paid to a collector.
    pub operator_address: Option<Address>,
}

impl RewardRecord {
    /// Idempotent; the first claim time is kept.
    pub fn mark_claimed(&mut self, at: DateTime<Utc>) {
        if !self.claimed {
            self.claimed = true;
            self.claimed_at = Some(at);
        }
    }
}

impl Timestamped for RewardRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Written once per cycle; its existence closes the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSummary {
    pub cycle_id: CycleId,
    pub total_rewards: u64,
    pub total_points: i64,
    pub operator_rewards: u64,
    pub delegator_rewards: u64,
    pub timestamp: DateTime<Utc>,
}

impl RewardSummary {
    pub fn empty(cycle_id: CycleId, timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            total_rewards: 0,
            total_points: 0,
            operator_rewards: 0,
            delegator_rewards: 0,
            timestamp,
        }
    }

    /// Counts `reward` into the totals.
    pub fn record(&mut self, reward: &RewardRecord) {
        match reward.reward_type {
            RewardType::Operator => self.operator_rewards += 1,
            RewardType::Delegator => self.delegator_rewards += 1,
        }
        self.total_rewards = self.operator_rewards + self.delegator_rewards;
        self.total_points += reward.points;
    }
}
