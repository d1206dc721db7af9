//! Heartbeat-driven uptime sampling for operator nodes.

pub mod postgres;
pub mod repository;
pub mod sampler;
pub mod window;

pub use postgres::PostgresHeartbeatRepository;
pub use repository::HeartbeatRepository;
pub use sampler::{Uptime, UptimeReport, UptimeSampler};
pub use window::TimeWindow;
