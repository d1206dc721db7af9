pub mod memory;
pub mod postgres;
pub mod traits;
pub mod transaction_manager;

pub use memory::{FailPoint, MemoryStore};
pub use traits::{
    ClaimRepository, ClaimSelection, DelegationLedger, OperatorRepository, RewardRepository,
    StorageCapabilities,
};
pub use transaction_manager::TransactionManager;
