use sqlx::PgPool;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::transaction::{Transaction, TxOutcome, TxStatus};

/// Handle over the transactions table. Cloning shares the underlying pool;
/// `close` drains it at shutdown.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    pool: PgPool,
}

impl TransactionStore {
    pub fn new(pool: PgPool) -> Self {
        TransactionStore { pool }
    }

    /// Record a freshly accepted charge as PENDING. Ids are gateway-issued,
    /// so a duplicate should not occur; when it does the request is failed
    /// rather than silently overwritten.
    pub async fn create_pending(
        &self,
        transaction_id: &str,
        phone: &str,
        amount: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions (transaction_id, phone, amount, status, mpesa_receipt) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(transaction_id)
        .bind(phone)
        .bind(amount)
        .bind(TxStatus::Pending)
        .bind(None::<String>)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateKey,
            other => AppError::Sqlx(other),
        })?;
        Ok(())
    }

    /// Apply the terminal outcome reported by the gateway. Returns false when
    /// no row matched; the gateway cannot be made to retry sanely, so an
    /// unknown id is a tolerated miss, not an error.
    pub async fn mark_result(&self, transaction_id: &str, outcome: TxOutcome) -> Result<bool> {
        let result = match outcome {
            TxOutcome::Success { receipt } => {
                sqlx::query(
                    "UPDATE transactions SET status = $1, mpesa_receipt = $2 \
                     WHERE transaction_id = $3",
                )
                .bind(TxStatus::Success)
                .bind(receipt)
                .bind(transaction_id)
                .execute(&self.pool)
                .await?
            }
            TxOutcome::Failed => {
                sqlx::query("UPDATE transactions SET status = $1 WHERE transaction_id = $2")
                    .bind(TxStatus::Failed)
                    .bind(transaction_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_status(&self, transaction_id: &str) -> Result<Option<TxStatus>> {
        let status = sqlx::query_scalar::<_, TxStatus>(
            "SELECT status FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    /// Most recently created row, by descending transaction id. The id is an
    /// opaque gateway string, so this ordering is only approximately
    /// chronological; callers get a best-effort convenience, not a durable
    /// ordering guarantee.
    pub async fn most_recent(&self) -> Result<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(
            "SELECT transaction_id, phone, amount, status, mpesa_receipt \
             FROM transactions ORDER BY transaction_id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(transaction)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
