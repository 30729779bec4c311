use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Ledger, LedgerError};
use crate::Amount;
use crate::model::{AccountId, ProcessedTransaction, TxHash, TxStatus};

/// Ledger held in memory. Each account and each hash is guarded by its
/// own shard entry lock, so conflicting operations serialize per key only.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: DashMap<AccountId, Amount>,
    transactions: DashMap<TxHash, ProcessedTransaction>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_balance(&self, account: AccountId) -> Result<Amount, LedgerError> {
        Ok(*self.accounts.entry(account).or_insert(Amount::ZERO))
    }

    async fn apply_delta(&self, account: AccountId, delta: Amount) -> Result<Amount, LedgerError> {
        let mut balance = self.accounts.entry(account).or_insert(Amount::ZERO);
        let next = balance
            .checked_add(delta)
            .ok_or(LedgerError::Overflow(account))?;
        if next.is_negative() {
            return Err(LedgerError::InsufficientFunds(account, *balance, -delta));
        }
        *balance = next;
        Ok(next)
    }

    async fn record_transaction_once(
        &self,
        tx: &ProcessedTransaction,
    ) -> Result<bool, LedgerError> {
        match self.transactions.entry(tx.tx_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(true)
            }
        }
    }

    async fn transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ProcessedTransaction>, LedgerError> {
        Ok(self.transactions.get(tx_hash).map(|r| r.value().clone()))
    }

    async fn transactions(
        &self,
        status: Option<TxStatus>,
    ) -> Result<Vec<ProcessedTransaction>, LedgerError> {
        let mut found: Vec<_> = self
            .transactions
            .iter()
            .filter(|r| status.is_none_or(|s| r.value().status == s))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
        Ok(found)
    }

    async fn balances(&self) -> Result<Vec<(AccountId, Amount)>, LedgerError> {
        let mut found: Vec<_> = self.accounts.iter().map(|r| (*r.key(), *r.value())).collect();
        found.sort_by_key(|(account, _)| *account);
        Ok(found)
    }
}
