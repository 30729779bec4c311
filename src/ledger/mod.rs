//! Durable per-account balances and the processed-transaction dedup set.
//!
//! Every component receives the ledger as an injected `Arc<dyn Ledger>`.
//! Implementations must make `apply_delta` atomic per account and
//! `record_transaction_once` atomic per transaction hash.

use async_trait::async_trait;
use tracing::{error, info};

use crate::Amount;
use crate::model::{AccountId, ProcessedTransaction, TxStatus};

mod error;
pub use error::LedgerError;

mod memory;
pub use memory::MemoryLedger;

mod sqlite;
pub use sqlite::SqliteLedger;

/// Result of the composite credit-if-new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credit {
    /// Recorded and credited; carries the new balance.
    Applied(Amount),
    /// Hash already recorded; balance untouched.
    Duplicate,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current balance, creating a zero-balance account on first lookup.
    async fn get_balance(&self, account: AccountId) -> Result<Amount, LedgerError>;

    /// Atomically add (positive) or subtract (negative) `delta`, returning the new balance.
    /// Fails with `InsufficientFunds` and leaves the balance untouched if it would go negative.
    async fn apply_delta(&self, account: AccountId, delta: Amount) -> Result<Amount, LedgerError>;

    /// Insert the record only if its hash is unknown; returns whether it was inserted.
    async fn record_transaction_once(&self, tx: &ProcessedTransaction)
    -> Result<bool, LedgerError>;

    async fn transaction(&self, tx_hash: &str)
    -> Result<Option<ProcessedTransaction>, LedgerError>;

    /// Recorded transactions, optionally filtered by status, ordered by hash.
    async fn transactions(
        &self,
        status: Option<TxStatus>,
    ) -> Result<Vec<ProcessedTransaction>, LedgerError>;

    /// All accounts with their balances, ordered by account id.
    async fn balances(&self) -> Result<Vec<(AccountId, Amount)>, LedgerError>;

    /// Record a confirmed deposit and credit it exactly once.
    ///
    /// - duplicate hash: balance is not touched
    /// - record inserted but credit failed: `LedgerError::Inconsistency`, logged
    ///   on the alert target and never retried
    async fn credit_if_new(
        &self,
        tx_hash: &str,
        account: AccountId,
        amount: Amount,
    ) -> Result<Credit, LedgerError> {
        let record = ProcessedTransaction {
            tx_hash: tx_hash.to_string(),
            account: Some(account),
            amount,
            status: TxStatus::Confirmed,
        };
        if !self.record_transaction_once(&record).await? {
            return Ok(Credit::Duplicate);
        }

        match self.apply_delta(account, amount).await {
            Ok(balance) => {
                info!(account = %account, tx = %tx_hash, amount = %amount, balance = %balance, "deposit credited");
                Ok(Credit::Applied(balance))
            }
            Err(e) => {
                let err = LedgerError::Inconsistency {
                    tx_hash: tx_hash.to_string(),
                    account,
                    amount,
                    reason: e.to_string(),
                };
                error!(target: "custody::alert", account = %account, tx = %tx_hash, amount = %amount, reason = %e, "manual recovery required");
                Err(err)
            }
        }
    }
}
