use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::Timestamped;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub client_address: Address,
    pub timestamp: DateTime<Utc>,
    /// Seconds of work the client reported with this heartbeat.
    pub duration_secs: i64,
    pub amount: u64,
}

impl Timestamped for Heartbeat {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
