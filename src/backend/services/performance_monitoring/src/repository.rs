use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared_models::{Address, Result};

use crate::window::TimeWindow;

/// Read side of the heartbeat time series written by the monitoring pipeline.
#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    /// Distinct `interval_bucket`s holding at least one heartbeat inside the window.
    async fn count_active_intervals(
        &self,
        address: &Address,
        window: TimeWindow,
        interval: Duration,
    ) -> Result<u64>;

    /// Sum of reported heartbeat durations inside the window, in seconds.
    async fn total_duration_secs(&self, address: &Address, window: TimeWindow) -> Result<i64>;

    async fn last_heartbeat(&self, address: &Address) -> Result<Option<DateTime<Utc>>>;

    /// Drops heartbeats older than `cutoff`, returning how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
