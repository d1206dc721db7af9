use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewardError};

/// Hex-encoded 20-byte account address, always stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub const HEX_LEN: usize = 40;

    /// Accepts `0x` plus 40 hex digits, in any case; stored lowercase.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| RewardError::validation(format!("address {:?} must start with 0x", raw)))?;

        if hex.len() != Self::HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RewardError::validation(format!(
                "address {:?} must be 0x followed by {} hex digits",
                raw,
                Self::HEX_LEN
            )));
        }

        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = RewardError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
