use futures::future::BoxFuture;
use shared_models::Result;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

/// Transaction manager for handling database transactions
#[derive(Clone)]
pub struct TransactionManager {
    pool: PgPool,
}

impl TransactionManager {
    /// Manager over a shared pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a transaction the caller must commit; dropping it rolls back.
    pub async fn begin_transaction(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Runs `f` inside a transaction. Commits if it returns `Ok`, rolls back
    /// otherwise.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'static, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let mut tx = self.begin_transaction().await?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
