//! Operator exports for manual reconciliation.

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, ProcessedTransaction};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write csv row: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush csv writer: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    user_id: AccountId,
    balance: String,
}

#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    tx_hash: &'a str,
    user_id: Option<AccountId>,
    amount: String,
    status: &'static str,
}

/// Write account balances in csv format
pub fn write_balances(
    writer: impl io::Write,
    balances: impl IntoIterator<Item = (AccountId, Amount)>,
) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(writer);
    for (user_id, balance) in balances {
        writer.serialize(BalanceRow {
            user_id,
            balance: balance.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write processed transactions in csv format
pub fn write_transactions<'a>(
    writer: impl io::Write,
    transactions: impl IntoIterator<Item = &'a ProcessedTransaction>,
) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(writer);
    for tx in transactions {
        writer.serialize(TransactionRow {
            tx_hash: &tx.tx_hash,
            user_id: tx.account,
            amount: tx.amount.to_string(),
            status: tx.status.as_str(),
        })?;
    }
    writer.flush()?;
    Ok(())
}
