mod delegation_ledger;
mod operator_repository;
mod reward_repository;

pub use delegation_ledger::PostgresDelegationLedger;
pub use operator_repository::PostgresOperatorRepository;
pub use reward_repository::PostgresRewardRepository;

use std::time::Duration;

use shared_models::{Address, CommissionRate, Result, RewardError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// Connects a pool sized and bounded by `config`.
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.connection_string)
        .await?;
    Ok(pool)
}

/// Applies the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// Persisted rows that fail validation are a storage fault, not caller input.

fn decode_address(raw: &str) -> Result<Address> {
    Address::parse(raw).map_err(|e| RewardError::storage(format!("corrupt address column: {}", e)))
}

fn decode_optional_address(raw: Option<String>) -> Result<Option<Address>> {
    raw.as_deref().map(decode_address).transpose()
}

fn decode_rate(percent: f64) -> Result<CommissionRate> {
    CommissionRate::from_percent(percent)
        .map_err(|e| RewardError::storage(format!("corrupt commission column: {}", e)))
}

fn decode_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| RewardError::storage(format!("negative count {} in storage", value)))
}

fn encode_count(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| RewardError::validation(format!("count {} exceeds storage range", value)))
}
