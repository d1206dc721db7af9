use std::collections::HashMap;

use async_trait::async_trait;
use shared_models::{Address, Result};

/// Independent source of truth for how many NFTs an address actually holds.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn verified_balance(&self, address: &Address) -> Result<u64>;
}

/// Trusts the delegation ledger as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnverifiedBalances;

#[async_trait]
impl BalanceOracle for UnverifiedBalances {
    async fn verified_balance(&self, _address: &Address) -> Result<u64> {
        Ok(u64::MAX)
    }
}

/// Fixed balances, e.g. loaded from a snapshot. Unknown addresses are
/// left unconstrained.
#[derive(Debug, Default, Clone)]
pub struct StaticBalances {
    balances: HashMap<Address, u64>,
}

impl StaticBalances {
    /// Pins the verified balance of `address`.
    pub fn with(mut self, address: Address, balance: u64) -> Self {
        self.balances.insert(address, balance);
        self
    }
}

#[async_trait]
impl BalanceOracle for StaticBalances {
    async fn verified_balance(&self, address: &Address) -> Result<u64> {
        Ok(self.balances.get(address).copied().unwrap_or(u64::MAX))
    }
}
