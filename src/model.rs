//! Core domain types for the custodial ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Amount;

/// Chat user identifier, also the ledger account key.
pub type AccountId = i64;

/// Chain-native transaction hash.
pub type TxHash = String;

/// Classification of an observed incoming transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Credited to the attributed account.
    Confirmed,
    /// Below the minimum deposit; recorded but never credited.
    AmountTooSmall,
    /// No account could be resolved; needs manual reconciliation.
    Unattributed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Confirmed => "confirmed",
            TxStatus::AmountTooSmall => "amount_too_small",
            TxStatus::Unattributed => "unattributed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(TxStatus::Confirmed),
            "amount_too_small" => Ok(TxStatus::AmountTooSmall),
            "unattributed" => Ok(TxStatus::Unattributed),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

/// A transaction the reconciler has seen and classified. Permanent once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTransaction {
    pub tx_hash: TxHash,
    /// `None` only for unattributed transactions.
    pub account: Option<AccountId>,
    pub amount: Amount,
    pub status: TxStatus,
}

/// Opaque per-transaction data handed to attribution policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxMetadata {
    /// Address the incoming message was sent to.
    pub destination: String,
    /// Text comment attached to the transfer, if any.
    pub memo: Option<String>,
    pub lt: Option<String>,
    pub utime: Option<i64>,
}

/// A transaction as reported by the chain feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: TxHash,
    /// Empty for system/internal messages.
    pub source: String,
    pub value_minor: i64,
    pub metadata: TxMetadata,
}

impl RawTransaction {
    /// Whether this looks like a user deposit at all.
    pub fn is_deposit(&self) -> bool {
        !self.source.is_empty() && self.value_minor > 0
    }

    pub fn amount(&self) -> Amount {
        Amount::from_minor(self.value_minor)
    }
}

/// Why a balance changed, carried to the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChangeReason {
    Deposit,
    Withdrawal,
}

impl fmt::Display for BalanceChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceChangeReason::Deposit => f.write_str("deposit"),
            BalanceChangeReason::Withdrawal => f.write_str("withdrawal"),
        }
    }
}
