use chrono::{DateTime, Duration, Utc};

/// Heartbeats are sampled on a fixed 5-minute grid.
pub const INTERVAL_SECS: i64 = 5 * 60;
pub const ALL_TIME_HISTORY_DAYS: i64 = 60;
pub const WEEKLY_HISTORY_DAYS: i64 = 7;

pub fn sampling_interval() -> Duration {
    Duration::seconds(INTERVAL_SECS)
}

pub fn all_time_span() -> Duration {
    Duration::days(ALL_TIME_HISTORY_DAYS)
}

pub fn weekly_span() -> Duration {
    Duration::days(WEEKLY_HISTORY_DAYS)
}

/// Closed interval `[start, end]` over which uptime is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// `[max(created_at, now - span), now]`. A future `created_at` collapses
    /// to an empty window ending at `now`.
    pub fn trailing(created_at: DateTime<Utc>, now: DateTime<Utc>, span: Duration) -> Self {
        let start = created_at.max(now - span).min(now);
        Self { start, end: now }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Number of whole intervals in the window, never less than one.
    pub fn expected_intervals(&self, interval: Duration) -> u64 {
        let interval_ms = interval.num_milliseconds().max(1);
        let span_ms = self.duration().num_milliseconds().max(0);
        ((span_ms / interval_ms) as u64).max(1)
    }
}

/// Grid bucket a timestamp falls into: `floor(millis / interval_millis)`.
pub fn interval_bucket(at: DateTime<Utc>, interval: Duration) -> i64 {
    at.timestamp_millis().div_euclid(interval.num_milliseconds().max(1))
}

/// `100 * observed / expected`, clamped to `[0, 100]`.
pub fn uptime_percentage(observed: u64, expected: u64) -> f64 {
    let expected = expected.max(1);
    (100.0 * observed as f64 / expected as f64).clamp(0.0, 100.0)
}
