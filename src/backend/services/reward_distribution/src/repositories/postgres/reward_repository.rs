use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_models::{
    Address, CycleId, Result, RewardError, RewardRecord, RewardSummary, RewardType, User, UserType,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::{decode_address, decode_count, decode_optional_address, encode_count};
use crate::repositories::traits::{ClaimRepository, ClaimSelection, RewardRepository, StorageCapabilities};
use crate::repositories::transaction_manager::TransactionManager;

const REWARD_COLUMNS: &str = r#"
    id, address, points, cycle_id, reward_type, claimed, claimed_at, created_at,
    nft_count, delegation_count, commission_rate, operator_address
"#;

const USER_COLUMNS: &str = r#"
    address, user_type, total_claimed_points, last_claim_time, created_at, updated_at
"#;

/// Rewards, cycle summaries, and the user claim ledger.
pub struct PostgresRewardRepository {
    pool: PgPool,
    transactions: TransactionManager,
}

impl PostgresRewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transactions: TransactionManager::new(pool.clone()),
            pool,
        }
    }
}

fn reward_from_row(row: &PgRow) -> Result<RewardRecord> {
    Ok(RewardRecord {
        id: row.try_get("id")?,
        address: decode_address(row.try_get("address")?)?,
        points: row.try_get("points")?,
        cycle_id: CycleId::parse(row.try_get("cycle_id")?).map_err(RewardError::storage)?,
        reward_type: RewardType::parse(row.try_get("reward_type")?)?,
        claimed: row.try_get("claimed")?,
        claimed_at: row.try_get("claimed_at")?,
        created_at: row.try_get("created_at")?,
        nft_count: decode_count(row.try_get("nft_count")?)?,
        delegation_count: decode_count(row.try_get("delegation_count")?)?,
        commission_rate: row.try_get("commission_rate")?,
        operator_address: decode_optional_address(row.try_get("operator_address")?)?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<RewardSummary> {
    Ok(RewardSummary {
        cycle_id: CycleId::parse(row.try_get("cycle_id")?).map_err(RewardError::storage)?,
        total_rewards: decode_count(row.try_get("total_rewards")?)?,
        total_points: row.try_get("total_points")?,
        operator_rewards: decode_count(row.try_get("operator_rewards")?)?,
        delegator_rewards: decode_count(row.try_get("delegator_rewards")?)?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        address: decode_address(row.try_get("address")?)?,
        user_type: UserType::parse(row.try_get("user_type")?)?,
        total_claimed_points: row.try_get("total_claimed_points")?,
        last_claim_time: row.try_get("last_claim_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn insert_reward(conn: &mut PgConnection, record: &RewardRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rewards (
            id, address, points, cycle_id, reward_type, claimed, claimed_at, created_at,
            nft_count, delegation_count, commission_rate, operator_address
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(record.id)
    .bind(record.address.as_str())
    .bind(record.points)
    .bind(record.cycle_id.as_str())
    .bind(record.reward_type.as_str())
    .bind(record.claimed)
    .bind(record.claimed_at)
    .bind(record.created_at)
    .bind(encode_count(record.nft_count)?)
    .bind(encode_count(record.delegation_count)?)
    .bind(record.commission_rate)
    .bind(record.operator_address.as_ref().map(Address::as_str))
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_summary_row(conn: &mut PgConnection, summary: &RewardSummary) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO reward_summaries (
            cycle_id, total_rewards, total_points, operator_rewards, delegator_rewards, timestamp
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (cycle_id) DO NOTHING
        "#,
    )
    .bind(summary.cycle_id.as_str())
    .bind(encode_count(summary.total_rewards)?)
    .bind(summary.total_points)
    .bind(encode_count(summary.operator_rewards)?)
    .bind(encode_count(summary.delegator_rewards)?)
    .bind(summary.timestamp)
    .execute(conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        return Err(RewardError::AlreadyProcessed(summary.cycle_id.clone()));
    }
    Ok(())
}

// The `claimed = false` guard makes a concurrent second claim on the same row
// update nothing instead of crediting twice.
async fn flip_records(
    conn: &mut PgConnection,
    address: &Address,
    selection: ClaimSelection,
    at: DateTime<Utc>,
) -> Result<Vec<RewardRecord>> {
    let only = match selection {
        ClaimSelection::One(id) => Some(id),
        ClaimSelection::AllUnclaimed => None,
    };
    let rows = sqlx::query(&format!(
        r#"
        UPDATE rewards
        SET claimed = true, claimed_at = $3
        WHERE address = $1 AND claimed = false AND ($2::uuid IS NULL OR id = $2)
        RETURNING {}
        "#,
        REWARD_COLUMNS
    ))
    .bind(address.as_str())
    .bind(only)
    .bind(at)
    .fetch_all(conn)
    .await?;

    if let (Some(id), true) = (only, rows.is_empty()) {
        return Err(RewardError::not_found(format!("unclaimed reward {} for {}", id, address)));
    }
    rows.iter().map(reward_from_row).collect()
}

async fn upsert_credit(
    conn: &mut PgConnection,
    address: &Address,
    user_type: UserType,
    points: i64,
    at: DateTime<Utc>,
) -> Result<User> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO users (address, user_type, total_claimed_points, last_claim_time, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4, $4)
        ON CONFLICT (address) DO UPDATE SET
            total_claimed_points = users.total_claimed_points + EXCLUDED.total_claimed_points,
            last_claim_time = EXCLUDED.last_claim_time,
            updated_at = EXCLUDED.updated_at
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(address.as_str())
    .bind(user_type.as_str())
    .bind(points)
    .bind(at)
    .fetch_one(conn)
    .await?;

    user_from_row(&row)
}

impl StorageCapabilities for PostgresRewardRepository {
    fn supports_transactions(&self) -> bool {
        true
    }
}

#[async_trait]
impl RewardRepository for PostgresRewardRepository {
    async fn find_summary(&self, cycle_id: &CycleId) -> Result<Option<RewardSummary>> {
        let row = sqlx::query(
            r#"
            SELECT cycle_id, total_rewards, total_points, operator_rewards, delegator_rewards, timestamp
            FROM reward_summaries
            WHERE cycle_id = $1
            "#,
        )
        .bind(cycle_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(summary_from_row).transpose()
    }

    async fn list_cycle_records(&self, cycle_id: &CycleId) -> Result<Vec<RewardRecord>> {
        let rows = sqlx::query(&format!("SELECT {} FROM rewards WHERE cycle_id = $1", REWARD_COLUMNS))
            .bind(cycle_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(reward_from_row).collect()
    }

    async fn delete_unclaimed_cycle_records(&self, cycle_id: &CycleId) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM rewards WHERE cycle_id = $1 AND claimed = false")
            .bind(cycle_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed)
    }

    async fn insert_rewards(&self, records: &[RewardRecord]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        for record in records {
            insert_reward(&mut conn, record).await?;
        }
        Ok(())
    }

    async fn insert_summary(&self, summary: &RewardSummary) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_summary_row(&mut conn, summary).await
    }

    async fn commit_cycle(&self, records: &[RewardRecord], summary: &RewardSummary) -> Result<()> {
        let records = records.to_vec();
        let summary = summary.clone();

        self.transactions
            .with_transaction(move |tx| {
                Box::pin(async move {
                    for record in &records {
                        insert_reward(&mut **tx, record).await?;
                    }
                    insert_summary_row(&mut **tx, &summary).await?;
                    debug!(cycle_id = %summary.cycle_id, records = records.len(), "cycle committed");
                    Ok(())
                })
            })
            .await
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM rewards WHERE id = $1", REWARD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(reward_from_row).transpose()
    }

    async fn list_rewards_by_address(&self, address: &Address) -> Result<Vec<RewardRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM rewards WHERE address = $1 ORDER BY created_at DESC",
            REWARD_COLUMNS
        ))
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reward_from_row).collect()
    }
}

#[async_trait]
impl ClaimRepository for PostgresRewardRepository {
    async fn claim_atomic(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>> {
        let address = address.clone();

        self.transactions
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let claimed = flip_records(&mut **tx, &address, selection, at).await?;
                    if let Some(first) = claimed.first() {
                        let points = claimed.iter().map(|r| r.points).sum();
                        upsert_credit(&mut **tx, &address, first.reward_type.into(), points, at).await?;
                    }
                    Ok(claimed)
                })
            })
            .await
    }

    async fn mark_claimed(
        &self,
        address: &Address,
        selection: ClaimSelection,
        at: DateTime<Utc>,
    ) -> Result<Vec<RewardRecord>> {
        let mut conn = self.pool.acquire().await?;
        flip_records(&mut conn, address, selection, at).await
    }

    async fn credit_user(
        &self,
        address: &Address,
        user_type: UserType,
        points: i64,
        at: DateTime<Utc>,
    ) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        upsert_credit(&mut conn, address, user_type, points, at).await
    }

    async fn get_user(&self, address: &Address) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE address = $1", USER_COLUMNS))
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }
}
