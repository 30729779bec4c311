//! Relay of balance-changed events to users. Delivery is best-effort.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::Amount;
use crate::model::{AccountId, BalanceChangeReason};

#[derive(Debug, Error)]
#[error("notification to {0} not delivered: {1}")]
pub struct NotifyError(pub AccountId, pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChanged {
    pub account: AccountId,
    pub new_balance: Amount,
    pub reason: BalanceChangeReason,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_balance_changed(
        &self,
        account: AccountId,
        new_balance: Amount,
        reason: BalanceChangeReason,
    ) -> Result<(), NotifyError>;
}

/// Writes events to the log only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify_balance_changed(
        &self,
        account: AccountId,
        new_balance: Amount,
        reason: BalanceChangeReason,
    ) -> Result<(), NotifyError> {
        info!(account = %account, balance = %new_balance, reason = %reason, "balance changed");
        Ok(())
    }
}

/// Forwards events to the messaging front end over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<BalanceChanged>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BalanceChanged>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify_balance_changed(
        &self,
        account: AccountId,
        new_balance: Amount,
        reason: BalanceChangeReason,
    ) -> Result<(), NotifyError> {
        let event = BalanceChanged {
            account,
            new_balance,
            reason,
        };
        // never wait on a slow front end
        self.tx
            .try_send(event)
            .map_err(|e| NotifyError(account, e.to_string()))
    }
}
