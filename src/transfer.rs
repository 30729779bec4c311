//! Outbound transfer capability. Signing and broadcasting happen outside
//! this crate; the ledger only hands over what was debited.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::Amount;

#[derive(Debug, Error)]
#[error("outbound transfer not accepted: {0}")]
pub struct TransferError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub destination: String,
    pub amount: Amount,
    pub memo: String,
}

#[async_trait]
pub trait OutboundTransfer: Send + Sync {
    async fn submit_outbound_transfer(
        &self,
        destination: &str,
        amount: Amount,
        memo: &str,
    ) -> Result<(), TransferError>;
}

/// Queues debited withdrawals for the external signer.
#[derive(Debug, Clone)]
pub struct TransferQueue {
    tx: mpsc::UnboundedSender<PendingTransfer>,
}

impl TransferQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingTransfer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutboundTransfer for TransferQueue {
    async fn submit_outbound_transfer(
        &self,
        destination: &str,
        amount: Amount,
        memo: &str,
    ) -> Result<(), TransferError> {
        let transfer = PendingTransfer {
            destination: destination.to_string(),
            amount,
            memo: memo.to_string(),
        };
        self.tx
            .send(transfer)
            .map_err(|e| TransferError(e.to_string()))
    }
}

/// Drain the queue until every sender is gone, logging each transfer for the signer.
pub async fn drain(mut rx: mpsc::UnboundedReceiver<PendingTransfer>) {
    while let Some(transfer) = rx.recv().await {
        info!(
            destination = %transfer.destination,
            amount = %transfer.amount,
            memo = %transfer.memo,
            "outbound transfer queued for signing"
        );
    }
}
