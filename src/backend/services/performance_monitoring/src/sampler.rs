use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shared_models::{Address, OperatorStatus, Result};
use tracing::debug;

use crate::repository::HeartbeatRepository;
use crate::window::{self, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Uptime {
    pub all_time: f64,
    pub weekly: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeReport {
    pub address: Address,
    pub all_time: f64,
    pub weekly: f64,
    pub weekly_active_secs: i64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub status: OperatorStatus,
}

/// Converts the heartbeat series of an address into bounded-window uptime.
pub struct UptimeSampler {
    repository: Arc<dyn HeartbeatRepository>,
    interval: Duration,
}

impl UptimeSampler {
    /// Sampler on the 5-minute grid.
    pub fn new(repository: Arc<dyn HeartbeatRepository>) -> Self {
        Self {
            repository,
            interval: window::sampling_interval(),
        }
    }

    /// All-time (capped at 60 days) and weekly uptime percentages.
    pub async fn compute_uptime(
        &self,
        address: &Address,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Uptime> {
        let all_time = self
            .sample(address, TimeWindow::trailing(created_at, now, window::all_time_span()))
            .await?;
        let weekly = self
            .sample(address, TimeWindow::trailing(created_at, now, window::weekly_span()))
            .await?;

        metrics::increment_counter!("uptime_samples_total");
        debug!(%address, all_time, weekly, "sampled uptime");

        Ok(Uptime { all_time, weekly })
    }

    /// The all-time figure alone, as the cycle needs it.
    pub async fn all_time_uptime(
        &self,
        address: &Address,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        self.sample(address, TimeWindow::trailing(created_at, now, window::all_time_span()))
            .await
    }

    /// Uptime plus weekly active seconds, last heartbeat and status.
    pub async fn report(
        &self,
        address: &Address,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<UptimeReport> {
        let uptime = self.compute_uptime(address, created_at, now).await?;
        let weekly_window = TimeWindow::trailing(created_at, now, window::weekly_span());
        let weekly_active_secs = self
            .repository
            .total_duration_secs(address, weekly_window)
            .await?;
        let last_heartbeat = self.repository.last_heartbeat(address).await?;

        Ok(UptimeReport {
            address: address.clone(),
            all_time: uptime.all_time,
            weekly: uptime.weekly,
            weekly_active_secs,
            last_heartbeat,
            status: OperatorStatus::from_last_heartbeat(last_heartbeat, now),
        })
    }

    /// Deletes heartbeats older than `cutoff` and returns how many went.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.repository.prune_before(cutoff).await
    }

    async fn sample(&self, address: &Address, window: TimeWindow) -> Result<f64> {
        let expected = window.expected_intervals(self.interval);
        let observed = self
            .repository
            .count_active_intervals(address, window, self.interval)
            .await?;
        Ok(window::uptime_percentage(observed, expected))
    }
}
