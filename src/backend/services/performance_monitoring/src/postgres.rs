use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared_models::{Address, Result};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::repository::HeartbeatRepository;
use crate::window::TimeWindow;

pub struct PostgresHeartbeatRepository {
    pool: PgPool,
}

impl PostgresHeartbeatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HeartbeatRepository for PostgresHeartbeatRepository {
    async fn count_active_intervals(
        &self,
        address: &Address,
        window: TimeWindow,
        interval: Duration,
    ) -> Result<u64> {
        let intervals: i64 = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT FLOOR(EXTRACT(EPOCH FROM timestamp) * 1000 / $4)) AS intervals
            FROM heartbeats
            WHERE client_address = $1 AND timestamp >= $2 AND timestamp <= $3
            "#,
        )
        .bind(address.as_str())
        .bind(window.start)
        .bind(window.end)
        .bind(interval.num_milliseconds())
        .fetch_one(&self.pool)
        .await?
        .try_get("intervals")?;

        Ok(intervals.max(0) as u64)
    }

    async fn total_duration_secs(&self, address: &Address, window: TimeWindow) -> Result<i64> {
        let total: i64 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(duration), 0)::BIGINT AS total
            FROM heartbeats
            WHERE client_address = $1 AND timestamp >= $2 AND timestamp <= $3
            "#,
        )
        .bind(address.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        Ok(total)
    }

    async fn last_heartbeat(&self, address: &Address) -> Result<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query(
            r#"
            SELECT MAX(timestamp) AS last_heartbeat
            FROM heartbeats
            WHERE client_address = $1
            "#,
        )
        .bind(address.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("last_heartbeat")?;

        Ok(last)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM heartbeats WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        info!(removed, %cutoff, "pruned heartbeats");
        Ok(removed)
    }
}
