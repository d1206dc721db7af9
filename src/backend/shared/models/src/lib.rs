pub mod address;
pub mod commission;
pub mod delegation;
pub mod error;
pub mod heartbeat;
pub mod operator;
pub mod reward;
pub mod user;

pub use address::Address;
pub use commission::CommissionRate;
pub use delegation::{Delegation, Direction};
pub use error::{InconsistentBalance, Result, RewardError};
pub use heartbeat::Heartbeat;
pub use operator::{Operator, OperatorStatus};
pub use reward::{CycleId, RewardRecord, RewardSummary, RewardType};
pub use user::{User, UserType};

// Common shared traits
pub trait Timestamped {
    fn timestamp(&self) -> chrono::DateTime<chrono::Utc>;
}
