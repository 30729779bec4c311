//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, TxHash};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds for account {0}: balance {1}, requested {2}")]
    InsufficientFunds(AccountId, Amount, Amount),

    #[error("balance overflow for account {0}")]
    Overflow(AccountId),

    #[error("storage error: {0}")]
    Storage(String),

    /// The transaction record is permanent but its balance half was not applied.
    /// Needs manual recovery; retrying would double-credit.
    #[error(
        "ledger inconsistency: transaction {tx_hash} recorded for account {account} \
         but credit of {amount} failed: {reason}"
    )]
    Inconsistency {
        tx_hash: TxHash,
        account: AccountId,
        amount: Amount,
        reason: String,
    },
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
