use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewardError};

/// Base points one delegated NFT earns per cycle, before commission.
pub const POINTS_PER_NFT: i64 = 1000;

/// Highest commission an operator may charge, in percent.
pub const MAX_COMMISSION_PERCENT: f64 = 10.0;

const BASIS_POINTS_PER_PERCENT: u32 = 100;
const MAX_BASIS_POINTS: u32 = 1_000;
// Absorbs binary float noise such as 2.55 * 100 = 254.99999999999997.
const BASIS_POINT_TOLERANCE: f64 = 1e-6;

/// Operator commission held in basis points (hundredths of a percent) so
/// that the per-NFT split stays exact integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CommissionRate {
    basis_points: u32,
}

impl CommissionRate {
    pub const ZERO: CommissionRate = CommissionRate { basis_points: 0 };
    pub const MAX: CommissionRate = CommissionRate { basis_points: MAX_BASIS_POINTS };

    /// Accepts a percentage in `[0, 10]` with at most two decimals.
    pub fn from_percent(percent: f64) -> Result<Self> {
        if !percent.is_finite() || !(0.0..=MAX_COMMISSION_PERCENT).contains(&percent) {
            return Err(RewardError::validation(format!(
                "commission rate {} must be between 0 and {} percent",
                percent, MAX_COMMISSION_PERCENT
            )));
        }
        let scaled = percent * BASIS_POINTS_PER_PERCENT as f64;
        let basis_points = scaled.round();
        // Finer rates would be rounded before the per-NFT floor and drift from it.
        if (scaled - basis_points).abs() > BASIS_POINT_TOLERANCE {
            return Err(RewardError::validation(format!(
                "commission rate {} must be a whole number of hundredths of a percent",
                percent
            )));
        }
        Self::from_basis_points(basis_points as u32)
    }

    /// Accepts hundredths of a percent, up to 1000 (10%).
    pub fn from_basis_points(basis_points: u32) -> Result<Self> {
        if basis_points > MAX_BASIS_POINTS {
            return Err(RewardError::validation(format!(
                "commission rate {} bps exceeds {} bps",
                basis_points, MAX_BASIS_POINTS
            )));
        }
        Ok(Self { basis_points })
    }

    /// Rate in hundredths of a percent.
    pub fn basis_points(&self) -> u32 {
        self.basis_points
    }

    /// Rate as a percentage, as stored and reported.
    pub fn as_percent(&self) -> f64 {
        self.basis_points as f64 / BASIS_POINTS_PER_PERCENT as f64
    }

    /// floor(1000 * rate / 100), computed without floating point.
    pub fn commission_per_nft(&self) -> i64 {
        POINTS_PER_NFT * self.basis_points as i64 / (100 * BASIS_POINTS_PER_PERCENT as i64)
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.as_percent())
    }
}

impl TryFrom<f64> for CommissionRate {
    type Error = RewardError;

    fn try_from(percent: f64) -> Result<Self> {
        Self::from_percent(percent)
    }
}

impl From<CommissionRate> for f64 {
    fn from(rate: CommissionRate) -> Self {
        rate.as_percent()
    }
}
