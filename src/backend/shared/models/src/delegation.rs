use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::commission::CommissionRate;

/// Live delegation of NFT units from a delegator to an operator. The ledger
/// keeps at most one record per (from, to) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub from_address: Address,
    pub to_address: Address,
    pub amount: u64,
    /// Snapshot taken when the delegation was recorded. Allocation always
    /// uses the operator's live rate instead.
    pub commission_rate: CommissionRate,
    pub timestamp: DateTime<Utc>,
}

impl Delegation {
    pub fn key(&self) -> (Address, Address) {
        (self.from_address.clone(), self.to_address.clone())
    }
}

/// Which side of the ledger an address is queried from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Delegations made by a delegator.
    Outgoing,
    /// Delegations received by an operator.
    Incoming,
}
