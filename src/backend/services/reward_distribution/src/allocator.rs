//! Point allocation. Pure integer arithmetic over eligibility facts; no I/O.

use std::collections::{BTreeMap, HashMap};

use shared_models::commission::POINTS_PER_NFT;
use shared_models::{Address, CommissionRate, Delegation, InconsistentBalance};

/// Flat points an eligible operator earns each cycle.
pub const BASE_OPERATOR_POINTS: i64 = 1000;
pub const MIN_OPERATOR_UPTIME: f64 = 50.0;
pub const MIN_DELEGATED_NFTS: u64 = 1;

/// What the allocator needs to know about an operator for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorStanding {
    pub address: Address,
    pub uptime: f64,
    /// Live rate; delegation snapshots are never consulted.
    pub commission_rate: CommissionRate,
    /// Sum of ledger amounts delegated to this operator.
    pub delegated_total: u64,
}

impl OperatorStanding {
    pub fn is_eligible(&self) -> bool {
        is_operator_eligible(self.uptime, self.delegated_total)
    }
}

/// At least 50% uptime and at least one delegated NFT.
pub fn is_operator_eligible(uptime: f64, delegated_total: u64) -> bool {
    uptime >= MIN_OPERATOR_UPTIME && delegated_total >= MIN_DELEGATED_NFTS
}

/// How the 1000 points of each delegated NFT are divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationSplit {
    pub delegator_points: i64,
    pub commission_points: i64,
}

/// Splits `amount` NFTs between delegator and operator at `rate`.
pub fn split_delegation(amount: u64, rate: CommissionRate) -> DelegationSplit {
    let units = nft_units(amount);
    let commission_per_nft = rate.commission_per_nft();
    DelegationSplit {
        delegator_points: units.saturating_mul(POINTS_PER_NFT - commission_per_nft),
        commission_points: units.saturating_mul(commission_per_nft),
    }
}

/// Flat operator points plus the commission collected from delegators.
pub fn operator_points(commission: i64) -> i64 {
    BASE_OPERATOR_POINTS.saturating_add(commission)
}

/// Caps a delegation at the delegator's verified balance. Never raises it.
pub fn usable_amount(delegation: &Delegation, verified_balance: u64) -> (u64, Option<InconsistentBalance>) {
    if delegation.amount <= verified_balance {
        return (delegation.amount, None);
    }
    let warning = InconsistentBalance {
        delegator: delegation.from_address.clone(),
        operator: delegation.to_address.clone(),
        claimed: delegation.amount,
        verified: verified_balance,
    };
    (verified_balance, Some(warning))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegatorAllocation {
    pub points: i64,
    pub nft_count: u64,
    pub delegation_count: u64,
    pub commission_points: i64,
    /// Commission owed to each operator by this delegator.
    pub commissions: BTreeMap<Address, i64>,
    pub capped: Vec<InconsistentBalance>,
}

impl DelegatorAllocation {
    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// Commission withheld as a percentage of the base points of all usable NFTs.
    pub fn effective_commission_rate(&self) -> f64 {
        if self.nft_count == 0 {
            return 0.0;
        }
        let base = self.nft_count as f64 * POINTS_PER_NFT as f64;
        self.commission_points as f64 * 100.0 / base
    }
}

/// Points for one delegator across all of its delegations. Delegations to
/// unknown or ineligible operators earn nothing.
pub fn allocate_delegator(
    delegations: &[Delegation],
    operators: &HashMap<Address, OperatorStanding>,
    verified_balance: u64,
) -> DelegatorAllocation {
    let mut allocation = DelegatorAllocation::default();

    for delegation in delegations {
        let Some(operator) = operators.get(&delegation.to_address) else {
            continue;
        };
        if !operator.is_eligible() {
            continue;
        }

        let (amount, capped) = usable_amount(delegation, verified_balance);
        if let Some(warning) = capped {
            allocation.capped.push(warning);
        }
        if amount == 0 {
            continue;
        }

        let split = split_delegation(amount, operator.commission_rate);
        allocation.points = allocation.points.saturating_add(split.delegator_points);
        allocation.commission_points = allocation.commission_points.saturating_add(split.commission_points);
        allocation.nft_count += amount;
        allocation.delegation_count += 1;
        *allocation.commissions.entry(operator.address.clone()).or_insert(0) += split.commission_points;
    }

    allocation
}

fn nft_units(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn address(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn rate(percent: f64) -> CommissionRate {
        CommissionRate::from_percent(percent).unwrap()
    }

    fn standing(n: u8, uptime: f64, percent: f64, delegated_total: u64) -> OperatorStanding {
        OperatorStanding {
            address: address(n),
            uptime,
            commission_rate: rate(percent),
            delegated_total,
        }
    }

    fn delegation(from: u8, to: u8, amount: u64, snapshot: f64) -> Delegation {
        Delegation {
            from_address: address(from),
            to_address: address(to),
            amount,
            commission_rate: rate(snapshot),
            timestamp: Utc::now(),
        }
    }

    fn index(standings: Vec<OperatorStanding>) -> HashMap<Address, OperatorStanding> {
        standings.into_iter().map(|s| (s.address.clone(), s)).collect()
    }

    #[test]
    fn eligibility_needs_uptime_and_stake() {
        assert!(is_operator_eligible(50.0, 1));
        assert!(!is_operator_eligible(49.99, 10));
        assert!(!is_operator_eligible(100.0, 0));
    }

    #[test]
    fn split_at_ten_percent() {
        let split = split_delegation(5, rate(10.0));
        assert_eq!(split.delegator_points, 4500);
        assert_eq!(split.commission_points, 500);
    }

    #[test]
    fn split_always_sums_to_base_points() {
        for bps in 0..=1_000u32 {
            let rate = CommissionRate::from_basis_points(bps).unwrap();
            for amount in [0u64, 1, 2, 3, 7, 13, 100, 9_999] {
                let split = split_delegation(amount, rate);
                assert_eq!(
                    split.delegator_points + split.commission_points,
                    POINTS_PER_NFT * amount as i64,
                    "bps={bps} amount={amount}"
                );
            }
        }
    }

    #[test]
    fn only_eligible_operators_pay_out() {
        let operators = index(vec![standing(10, 80.0, 5.0, 2), standing(11, 30.0, 5.0, 3)]);
        let delegations = vec![delegation(1, 10, 2, 5.0), delegation(1, 11, 3, 5.0)];

        let allocation = allocate_delegator(&delegations, &operators, u64::MAX);

        assert_eq!(allocation.points, 1900);
        assert_eq!(allocation.nft_count, 2);
        assert_eq!(allocation.delegation_count, 1);
        assert_eq!(allocation.commissions.get(&address(10)), Some(&100));
        assert!(!allocation.commissions.contains_key(&address(11)));
    }

    #[test]
    fn low_uptime_operator_yields_nothing() {
        let operators = index(vec![standing(10, 40.0, 5.0, 4)]);
        let allocation = allocate_delegator(&[delegation(1, 10, 4, 5.0)], &operators, u64::MAX);
        assert!(allocation.is_empty());
        assert!(allocation.commissions.is_empty());
    }

    #[test]
    fn live_rate_overrides_snapshot() {
        let operators = index(vec![standing(10, 90.0, 10.0, 1)]);
        let allocation = allocate_delegator(&[delegation(1, 10, 1, 0.0)], &operators, u64::MAX);
        assert_eq!(allocation.points, 900);
        assert_eq!(allocation.commission_points, 100);
        assert_eq!(allocation.effective_commission_rate(), 10.0);
    }

    #[test]
    fn delegations_are_capped_at_verified_balance() {
        let operators = index(vec![standing(10, 90.0, 0.0, 8)]);
        let allocation = allocate_delegator(&[delegation(1, 10, 8, 0.0)], &operators, 3);

        assert_eq!(allocation.points, 3000);
        assert_eq!(allocation.nft_count, 3);
        assert_eq!(allocation.capped.len(), 1);
        assert_eq!(allocation.capped[0].claimed, 8);
        assert_eq!(allocation.capped[0].verified, 3);
    }

    #[test]
    fn zero_balance_skips_the_delegation() {
        let operators = index(vec![standing(10, 90.0, 0.0, 8)]);
        let allocation = allocate_delegator(&[delegation(1, 10, 8, 0.0)], &operators, 0);
        assert!(allocation.is_empty());
        assert_eq!(allocation.delegation_count, 0);
        assert_eq!(allocation.capped.len(), 1);
    }

    #[test]
    fn operator_totals() {
        let commission: i64 = [5, 2]
            .into_iter()
            .map(|amount| split_delegation(amount, rate(10.0)).commission_points)
            .sum();
        assert_eq!(operator_points(commission), 1700);
        assert_eq!(operator_points(0), BASE_OPERATOR_POINTS);
    }
}
