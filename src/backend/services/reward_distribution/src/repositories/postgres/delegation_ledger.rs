use async_trait::async_trait;
use shared_models::{Address, Delegation, Direction, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{decode_address, decode_count, decode_rate};
use crate::repositories::traits::DelegationLedger;

pub struct PostgresDelegationLedger {
    pool: PgPool,
}

impl PostgresDelegationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn delegation_from_row(row: &PgRow) -> Result<Delegation> {
    Ok(Delegation {
        from_address: decode_address(row.try_get("from_address")?)?,
        to_address: decode_address(row.try_get("to_address")?)?,
        amount: decode_count(row.try_get("amount")?)?,
        commission_rate: decode_rate(row.try_get("commission_rate")?)?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl DelegationLedger for PostgresDelegationLedger {
    async fn list_delegations(&self, address: &Address, direction: Direction) -> Result<Vec<Delegation>> {
        let column = match direction {
            Direction::Outgoing => "from_address",
            Direction::Incoming => "to_address",
        };
        let rows = sqlx::query(&format!(
            r#"
            SELECT from_address, to_address, amount, commission_rate, timestamp
            FROM delegations
            WHERE {} = $1
            ORDER BY from_address, to_address
            "#,
            column
        ))
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(delegation_from_row).collect()
    }

    async fn list_delegators(&self) -> Result<Vec<Address>> {
        let rows = sqlx::query("SELECT DISTINCT from_address FROM delegations ORDER BY from_address")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode_address(row.try_get("from_address")?))
            .collect()
    }
}
