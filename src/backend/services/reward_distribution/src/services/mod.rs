pub mod claim_service;
pub mod cycle_service;
pub mod scheduler;

pub use claim_service::{ClaimMode, ClaimReceipt, ClaimService};
pub use cycle_service::{cycle_id_for, CycleContext, CycleOutcome, CyclePhase, CycleRun, CycleService};
pub use scheduler::{next_trigger, Scheduler, SchedulerHandle, SchedulerSettings};
