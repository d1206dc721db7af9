use async_trait::async_trait;
use shared_models::{Address, Operator, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{decode_address, decode_count, decode_optional_address, decode_rate};
use crate::repositories::traits::OperatorRepository;

const OPERATOR_COLUMNS: &str = r#"
    address, uptime_percentage, commission_rate, nft_amount,
    reward_collector_address, created_at, last_heartbeat
"#;

pub struct PostgresOperatorRepository {
    pool: PgPool,
}

impl PostgresOperatorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn operator_from_row(row: &PgRow) -> Result<Operator> {
    Ok(Operator {
        address: decode_address(row.try_get("address")?)?,
        uptime_percentage: row.try_get("uptime_percentage")?,
        commission_rate: decode_rate(row.try_get("commission_rate")?)?,
        nft_amount: decode_count(row.try_get("nft_amount")?)?,
        reward_collector_address: decode_optional_address(row.try_get("reward_collector_address")?)?,
        created_at: row.try_get("created_at")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
    })
}

#[async_trait]
impl OperatorRepository for PostgresOperatorRepository {
    async fn list_operators(&self) -> Result<Vec<Operator>> {
        let rows = sqlx::query(&format!("SELECT {} FROM operators ORDER BY address", OPERATOR_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(operator_from_row).collect()
    }

    async fn get_operator(&self, address: &Address) -> Result<Option<Operator>> {
        let row = sqlx::query(&format!("SELECT {} FROM operators WHERE address = $1", OPERATOR_COLUMNS))
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(operator_from_row).transpose()
    }
}
