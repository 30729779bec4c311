//! Deposit reconciliation.
//!
//! Polls the chain feed for the watched address, classifies each incoming
//! transaction and credits the ledger. Feed batches overlap and reorder
//! freely; exactly-once crediting rests solely on the ledger's
//! `record_transaction_once` gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::Amount;
use crate::feed::{ChainFeed, FeedError};
use crate::ledger::{Credit, Ledger, LedgerError};
use crate::model::{BalanceChangeReason, ProcessedTransaction, RawTransaction, TxStatus};
use crate::notify::NotificationSink;

mod attribution;
pub use attribution::{AddressBookAttribution, Attribution, AttributionFailed, MemoAttribution};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Custodial address deposits are sent to.
    pub address: String,
    /// Batch size requested from the feed.
    pub limit: u32,
    pub interval: Duration,
    /// Deposits below this are recorded as `amount_too_small`.
    pub min_deposit: Amount,
}

impl ReconcilerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            limit: 20,
            interval: Duration::from_secs(30),
            min_deposit: Amount::from_minor(100_000_000),
        }
    }
}

/// Counters for one poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub credited: usize,
    pub too_small: usize,
    pub unattributed: usize,
    /// Already recorded by an earlier tick.
    pub duplicates: usize,
    /// System messages and zero-value transfers.
    pub ignored: usize,
    pub failed: usize,
}

enum Outcome {
    Credited,
    TooSmall,
    Unattributed,
    Duplicate,
    Ignored,
}

pub struct Reconciler {
    feed: Arc<dyn ChainFeed>,
    ledger: Arc<dyn Ledger>,
    attribution: Arc<dyn Attribution>,
    sink: Arc<dyn NotificationSink>,
    config: ReconcilerConfig,
}

/// Public API
impl Reconciler {
    pub fn new(
        feed: Arc<dyn ChainFeed>,
        ledger: Arc<dyn Ledger>,
        attribution: Arc<dyn Attribution>,
        sink: Arc<dyn NotificationSink>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            feed,
            ledger,
            attribution,
            sink,
            config,
        }
    }

    /// Poll once and process the batch in the order received.
    /// A feed failure aborts the tick before anything is written.
    pub async fn tick(&self) -> Result<TickReport, FeedError> {
        let batch = self
            .feed
            .fetch_recent(&self.config.address, self.config.limit)
            .await?;

        let mut report = TickReport {
            fetched: batch.len(),
            ..TickReport::default()
        };

        for tx in &batch {
            match self.process(tx).await {
                Ok(Outcome::Credited) => report.credited += 1,
                Ok(Outcome::TooSmall) => report.too_small += 1,
                Ok(Outcome::Unattributed) => report.unattributed += 1,
                Ok(Outcome::Duplicate) => report.duplicates += 1,
                Ok(Outcome::Ignored) => report.ignored += 1,
                Err(e) => {
                    // one bad transaction never blocks the rest of the batch
                    error!(tx = %tx.hash, reason = %e, "transaction processing failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick on the configured interval until shutdown.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.run_with(IntervalStream::new(ticker).map(|_| ()), shutdown)
            .await;
    }

    /// Tick once per item of `ticks` until the stream ends or shutdown fires.
    pub async fn run_with(
        &self,
        mut ticks: impl Stream<Item = ()> + Unpin,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(address = %self.config.address, "reconciler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                next = ticks.next() => {
                    if next.is_none() {
                        break;
                    }
                    match self.tick().await {
                        Ok(report) => Self::log_report(&report),
                        Err(e) => warn!(reason = %e, "tick skipped"),
                    }
                }
            }
        }
        info!("reconciler stopped");
    }
}

/// Private API
impl Reconciler {
    fn log_report(report: &TickReport) {
        info!(
            fetched = report.fetched,
            credited = report.credited,
            too_small = report.too_small,
            unattributed = report.unattributed,
            duplicates = report.duplicates,
            ignored = report.ignored,
            failed = report.failed,
            "tick completed"
        );
    }

    /// Classify one transaction:
    /// - no source or no value: ignored, nothing recorded
    /// - no resolvable account: recorded `unattributed`
    /// - below the minimum: recorded `amount_too_small`, balance untouched
    /// - otherwise: credited once and the user notified
    async fn process(&self, tx: &RawTransaction) -> Result<Outcome, LedgerError> {
        if !tx.is_deposit() {
            return Ok(Outcome::Ignored);
        }
        let amount = tx.amount();

        let account = match self.attribution.attribute(tx) {
            Ok(account) => account,
            Err(e) => {
                let record = ProcessedTransaction {
                    tx_hash: tx.hash.clone(),
                    account: None,
                    amount,
                    status: TxStatus::Unattributed,
                };
                if !self.ledger.record_transaction_once(&record).await? {
                    return Ok(Outcome::Duplicate);
                }
                warn!(
                    tx = %tx.hash,
                    source = %tx.source,
                    amount = %amount,
                    reason = %e,
                    "unattributed deposit, manual reconciliation required"
                );
                return Ok(Outcome::Unattributed);
            }
        };

        if amount < self.config.min_deposit {
            let record = ProcessedTransaction {
                tx_hash: tx.hash.clone(),
                account: Some(account),
                amount,
                status: TxStatus::AmountTooSmall,
            };
            if !self.ledger.record_transaction_once(&record).await? {
                return Ok(Outcome::Duplicate);
            }
            info!(
                account = %account,
                tx = %tx.hash,
                amount = %amount,
                minimum = %self.config.min_deposit,
                "deposit below minimum, not credited"
            );
            return Ok(Outcome::TooSmall);
        }

        match self.ledger.credit_if_new(&tx.hash, account, amount).await? {
            Credit::Duplicate => Ok(Outcome::Duplicate),
            Credit::Applied(balance) => {
                if let Err(e) = self
                    .sink
                    .notify_balance_changed(account, balance, BalanceChangeReason::Deposit)
                    .await
                {
                    // the credit stands regardless
                    warn!(account = %account, tx = %tx.hash, reason = %e, "deposit notification failed");
                }
                Ok(Outcome::Credited)
            }
        }
    }
}
