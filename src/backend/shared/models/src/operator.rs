use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::commission::CommissionRate;

pub const INACTIVE_AFTER_MINUTES: i64 = 5;
pub const OFFLINE_AFTER_MINUTES: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub address: Address,
    /// All-time uptime as last written by the monitoring pipeline.
    pub uptime_percentage: f64,
    pub commission_rate: CommissionRate,
    pub nft_amount: u64,
    pub reward_collector_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Operator {
    /// Where operator rewards are paid; the operator itself unless a collector is set.
    pub fn payout_address(&self) -> &Address {
        self.reward_collector_address.as_ref().unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorStatus {
    Active,
    Inactive,
    Offline,
}

impl OperatorStatus {
    /// Active within 5 minutes of the last heartbeat, offline after 10.
    pub fn from_last_heartbeat(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(last) = last else {
            return OperatorStatus::Offline;
        };
        let silence = now - last;
        if silence > Duration::minutes(OFFLINE_AFTER_MINUTES) {
            OperatorStatus::Offline
        } else if silence > Duration::minutes(INACTIVE_AFTER_MINUTES) {
            OperatorStatus::Inactive
        } else {
            OperatorStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_follows_heartbeat_recency() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let at = |mins| Some(now - Duration::minutes(mins));

        assert_eq!(OperatorStatus::from_last_heartbeat(at(1), now), OperatorStatus::Active);
        assert_eq!(OperatorStatus::from_last_heartbeat(at(5), now), OperatorStatus::Active);
        assert_eq!(OperatorStatus::from_last_heartbeat(at(7), now), OperatorStatus::Inactive);
        assert_eq!(OperatorStatus::from_last_heartbeat(at(11), now), OperatorStatus::Offline);
        assert_eq!(OperatorStatus::from_last_heartbeat(None, now), OperatorStatus::Offline);
    }

    #[test]
    fn payout_defaults_to_operator() {
        let address = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        let collector = Address::parse("0x2222222222222222222222222222222222222222").unwrap();
        let mut operator = Operator {
            address: address.clone(),
            uptime_percentage: 0.0,
            commission_rate: CommissionRate::ZERO,
            nft_amount: 0,
            reward_collector_address: None,
            created_at: Utc::now(),
            last_heartbeat: None,
        };
        assert_eq!(operator.payout_address(), &address);

        operator.reward_collector_address = Some(collector.clone());
        assert_eq!(operator.payout_address(), &collector);
    }
}
