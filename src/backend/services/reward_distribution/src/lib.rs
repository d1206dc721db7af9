//! Daily reward cycles and claims for delegated node operators.
//!
//! Operators earn a flat base plus commission on NFTs delegated to them;
//! delegators earn the rest. A cycle runs at most once per cycle id and its
//! summary row is the commit marker.

pub mod allocator;
pub mod clock;
pub mod config;
pub mod engine;
pub mod oracle;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use engine::{EngineParts, RewardEngine};
pub use shared_models::{Result, RewardError};
