//! Errors surfaced to the messaging front end.

use thiserror::Error;

use super::WithdrawalState;
use super::address::AddressError;
use crate::Amount;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum WithdrawalError {
    /// Entry rejected: nothing to withdraw.
    #[error("no funds available for withdrawal")]
    NoFunds,

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("insufficient funds: balance {0}, requested {1}")]
    InsufficientFunds(Amount, Amount),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("no withdrawal in progress")]
    NotInProgress,

    #[error("withdrawal is in state {0:?}")]
    OutOfOrder(WithdrawalState),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for WithdrawalError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds(_, balance, requested) => {
                WithdrawalError::InsufficientFunds(balance, requested)
            }
            other => WithdrawalError::Ledger(other),
        }
    }
}
