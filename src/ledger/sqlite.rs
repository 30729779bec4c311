//! SQLite-backed ledger.
//!
//! Atomicity comes from the storage layer: the transaction hash is the
//! primary key (`INSERT OR IGNORE` is the idempotency gate) and balance
//! changes are a single conditional `UPDATE`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{Ledger, LedgerError};
use crate::Amount;
use crate::model::{AccountId, ProcessedTransaction, TxStatus};

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the database at `url` and initialize the schema.
    pub async fn open(url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.initialize_schema().await?;
        info!(url, "ledger opened");
        Ok(ledger)
    }

    /// Private in-memory database. Limited to one connection since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        Self::open("sqlite::memory:", 1).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("ledger closed");
    }

    async fn initialize_schema(&self) -> Result<(), LedgerError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                user_id INTEGER PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                tx_hash TEXT PRIMARY KEY,
                user_id INTEGER,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS transactions_status ON transactions(status);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn ensure_account(&self, account: AccountId) -> Result<(), LedgerError> {
        sqlx::query("INSERT OR IGNORE INTO accounts (user_id, balance) VALUES (?1, 0)")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<ProcessedTransaction, LedgerError> {
        let status: String = row.try_get("status")?;
        Ok(ProcessedTransaction {
            tx_hash: row.try_get("tx_hash")?,
            account: row.try_get("user_id")?,
            amount: Amount::from_minor(row.try_get("amount")?),
            status: TxStatus::from_str(&status).map_err(LedgerError::Storage)?,
        })
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn get_balance(&self, account: AccountId) -> Result<Amount, LedgerError> {
        self.ensure_account(account).await?;
        let balance: i64 = sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = ?1")
            .bind(account)
            .fetch_one(&self.pool)
            .await?;
        Ok(Amount::from_minor(balance))
    }

    async fn apply_delta(&self, account: AccountId, delta: Amount) -> Result<Amount, LedgerError> {
        self.ensure_account(account).await?;

        // accepted range for the current balance; outside it the sum would
        // go negative or past i64::MAX, which SQLite turns into a REAL
        let minor = delta.minor();
        let floor = minor.saturating_neg().max(0);
        let ceiling = if minor > 0 { i64::MAX - minor } else { i64::MAX };

        // check-and-apply in one statement; no row back means out of range
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + ?1 \
             WHERE user_id = ?2 AND balance >= ?3 AND balance <= ?4 \
             RETURNING balance",
        )
        .bind(minor)
        .bind(account)
        .bind(floor)
        .bind(ceiling)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(balance) = updated {
            return Ok(Amount::from_minor(balance));
        }

        let balance: i64 = sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = ?1")
            .bind(account)
            .fetch_one(&self.pool)
            .await?;
        if delta.is_positive() {
            Err(LedgerError::Overflow(account))
        } else {
            Err(LedgerError::InsufficientFunds(
                account,
                Amount::from_minor(balance),
                -delta,
            ))
        }
    }

    async fn record_transaction_once(
        &self,
        tx: &ProcessedTransaction,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO transactions (tx_hash, user_id, amount, status) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&tx.tx_hash)
        .bind(tx.account)
        .bind(tx.amount.minor())
        .bind(tx.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ProcessedTransaction>, LedgerError> {
        let row = sqlx::query(
            "SELECT tx_hash, user_id, amount, status FROM transactions WHERE tx_hash = ?1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn transactions(
        &self,
        status: Option<TxStatus>,
    ) -> Result<Vec<ProcessedTransaction>, LedgerError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT tx_hash, user_id, amount, status FROM transactions \
                     WHERE status = ?1 ORDER BY tx_hash",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT tx_hash, user_id, amount, status FROM transactions ORDER BY tx_hash",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn balances(&self) -> Result<Vec<(AccountId, Amount)>, LedgerError> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT user_id, balance FROM accounts ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(account, balance)| (account, Amount::from_minor(balance)))
            .collect())
    }
}
