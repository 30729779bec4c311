//! Inbound interface for the messaging front end: balance lookup and the
//! per-user withdrawal dialogue.
//!
//! The dialogue is an explicit state machine keyed by user id and kept in
//! memory only:
//!
//! ```text
//! idle -> awaiting_amount -> awaiting_address -> submitted
//!              |                   |
//!              +----> cancelled <--+
//! ```
//!
//! A finished dialogue keeps its outcome until the user starts a new one
//! or the sweeper drops it.
//!
//! The balance is debited only on submission, so cancelling or abandoning
//! a dialogue never touches the ledger.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::Amount;
use crate::ledger::{Ledger, LedgerError};
use crate::model::{AccountId, BalanceChangeReason};
use crate::notify::NotificationSink;
use crate::transfer::OutboundTransfer;

mod address;
pub use address::{AddressError, AddressValidator, TonAddressValidator};

mod error;
pub use error::WithdrawalError;

mod state;
pub use state::WithdrawalState;
use state::Session;

/// What the front end shows once a withdrawal is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub amount: Amount,
    pub destination: String,
    pub new_balance: Amount,
}

pub struct Wallet {
    ledger: Arc<dyn Ledger>,
    transfers: Arc<dyn OutboundTransfer>,
    sink: Arc<dyn NotificationSink>,
    validator: Arc<dyn AddressValidator>,
    sessions: DashMap<AccountId, Arc<Mutex<Session>>>,
}

/// Public API
impl Wallet {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        transfers: Arc<dyn OutboundTransfer>,
        sink: Arc<dyn NotificationSink>,
        validator: Arc<dyn AddressValidator>,
    ) -> Self {
        Self {
            ledger,
            transfers,
            sink,
            validator,
            sessions: DashMap::new(),
        }
    }

    pub async fn get_balance(&self, account: AccountId) -> Result<Amount, LedgerError> {
        self.ledger.get_balance(account).await
    }

    /// Current dialogue state; `Idle` when none is known.
    pub async fn state(&self, account: AccountId) -> WithdrawalState {
        match self.session(account) {
            Some(session) => session.lock().await.state,
            None => WithdrawalState::Idle,
        }
    }

    /// Open (or restart) the dialogue. Returns the balance available.
    pub async fn begin_withdrawal(&self, account: AccountId) -> Result<Amount, WithdrawalError> {
        let balance = self.ledger.get_balance(account).await?;
        if !balance.is_positive() {
            return Err(WithdrawalError::NoFunds);
        }

        let fresh = Arc::new(Mutex::new(Session::new()));
        if let Some(previous) = self.sessions.insert(account, fresh) {
            let mut previous = previous.lock().await;
            if previous.is_open() {
                previous.finish(WithdrawalState::Cancelled);
            }
        }
        info!(account = %account, balance = %balance, "withdrawal started");
        Ok(balance)
    }

    /// Accept the amount step. Checked against the live balance; on any
    /// error the dialogue stays in `awaiting_amount`.
    pub async fn submit_withdrawal_amount(
        &self,
        account: AccountId,
        text: &str,
    ) -> Result<Amount, WithdrawalError> {
        let session = self.session(account).ok_or(WithdrawalError::NotInProgress)?;
        let mut session = session.lock().await;
        match session.state {
            WithdrawalState::AwaitingAmount => {}
            other if !other.is_open() => return Err(WithdrawalError::NotInProgress),
            other => return Err(WithdrawalError::OutOfOrder(other)),
        }

        let amount: Amount = text
            .parse()
            .map_err(|_| WithdrawalError::InvalidAmount(text.trim().to_string()))?;
        if !amount.is_positive() {
            return Err(WithdrawalError::InvalidAmount(text.trim().to_string()));
        }

        let balance = self.ledger.get_balance(account).await?;
        if amount > balance {
            return Err(WithdrawalError::InsufficientFunds(balance, amount));
        }

        session.advance(WithdrawalState::AwaitingAddress { amount });
        Ok(amount)
    }

    /// Accept the destination, debit the balance and hand the transfer over.
    ///
    /// - invalid address: stays in `awaiting_address`
    /// - balance dropped below the amount since the amount step: the dialogue
    ///   is aborted with `InsufficientFunds`
    /// - debited: the dialogue ends; a transfer that cannot be handed over is
    ///   alerted for manual review and is never re-credited automatically
    pub async fn submit_withdrawal_address(
        &self,
        account: AccountId,
        text: &str,
    ) -> Result<WithdrawalReceipt, WithdrawalError> {
        let session = self.session(account).ok_or(WithdrawalError::NotInProgress)?;
        let mut session = session.lock().await;
        let amount = match session.state {
            WithdrawalState::AwaitingAddress { amount } => amount,
            other if !other.is_open() => return Err(WithdrawalError::NotInProgress),
            other => return Err(WithdrawalError::OutOfOrder(other)),
        };

        let destination = text.trim();
        self.validator.validate(destination)?;

        let new_balance = match self.ledger.apply_delta(account, -amount).await {
            Ok(balance) => balance,
            Err(e @ LedgerError::InsufficientFunds(..)) => {
                session.finish(WithdrawalState::Cancelled);
                info!(account = %account, amount = %amount, reason = %e, "withdrawal aborted");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        session.finish(WithdrawalState::Submitted);
        drop(session);

        info!(account = %account, amount = %amount, destination, balance = %new_balance, "withdrawal debited");

        let memo = format!("withdrawal for user {account}");
        if let Err(e) = self
            .transfers
            .submit_outbound_transfer(destination, amount, &memo)
            .await
        {
            error!(
                target: "custody::alert",
                account = %account,
                amount = %amount,
                destination,
                reason = %e,
                "debited withdrawal not handed to signer, manual review required"
            );
        }

        if let Err(e) = self
            .sink
            .notify_balance_changed(account, new_balance, BalanceChangeReason::Withdrawal)
            .await
        {
            warn!(account = %account, reason = %e, "withdrawal notification failed");
        }

        Ok(WithdrawalReceipt {
            amount,
            destination: destination.to_string(),
            new_balance,
        })
    }

    /// Drop the dialogue. No ledger effect.
    pub async fn cancel_withdrawal(&self, account: AccountId) -> Result<(), WithdrawalError> {
        let session = self.session(account).ok_or(WithdrawalError::NotInProgress)?;
        let mut session = session.lock().await;
        if !session.is_open() {
            return Err(WithdrawalError::NotInProgress);
        }
        session.finish(WithdrawalState::Cancelled);
        info!(account = %account, "withdrawal cancelled");
        Ok(())
    }

    /// Discard dialogues untouched for `ttl`, finished or not. Busy
    /// sessions are skipped; an abandoned open one ends as `Cancelled`.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| match handle.try_lock() {
            Ok(mut session) if session.is_expired(ttl) => {
                if session.is_open() {
                    session.finish(WithdrawalState::Cancelled);
                }
                false
            }
            _ => true,
        });
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(purged, "expired withdrawal sessions discarded");
        }
        purged
    }

    /// Dialogues still awaiting input. Sessions locked by a call in flight
    /// count as open.
    pub fn open_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().try_lock().map_or(true, |s| s.is_open()))
            .count()
    }
}

/// Private API
impl Wallet {
    fn session(&self, account: AccountId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&account).map(|r| Arc::clone(r.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::notify::{BalanceChanged, ChannelSink};
    use crate::transfer::{PendingTransfer, TransferQueue};
    use tokio::sync::mpsc;

    const ADDRESS: &str = "EQD4FPq-PRDieyQKkizFTRtSDyucUIqrj0v_zXJmqaDp6_0t";

    struct Harness {
        wallet: Wallet,
        ledger: Arc<MemoryLedger>,
        transfers: mpsc::UnboundedReceiver<PendingTransfer>,
        events: mpsc::Receiver<BalanceChanged>,
    }

    async fn harness(balance: &str) -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .apply_delta(1, balance.parse().unwrap())
            .await
            .unwrap();
        let (queue, transfers) = TransferQueue::new();
        let (sink, events) = ChannelSink::new(8);
        let wallet = Wallet::new(
            ledger.clone(),
            Arc::new(queue),
            Arc::new(sink),
            Arc::new(TonAddressValidator::default()),
        );
        Harness {
            wallet,
            ledger,
            transfers,
            events,
        }
    }

    #[tokio::test]
    async fn full_withdrawal_debits_and_queues_transfer() {
        let mut h = harness("1.0").await;

        assert_eq!(h.wallet.begin_withdrawal(1).await.unwrap(), Amount::from_units(1));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAmount);

        let amount = h.wallet.submit_withdrawal_amount(1, "0.4").await.unwrap();
        assert_eq!(amount, Amount::from_minor(400_000_000));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAddress { amount });

        let receipt = h.wallet.submit_withdrawal_address(1, ADDRESS).await.unwrap();
        assert_eq!(receipt.new_balance, Amount::from_minor(600_000_000));
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_minor(600_000_000));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::Submitted);
        assert_eq!(h.wallet.open_sessions(), 0);

        let transfer = h.transfers.recv().await.unwrap();
        assert_eq!(transfer.destination, ADDRESS);
        assert_eq!(transfer.amount, amount);
        assert_eq!(transfer.memo, "withdrawal for user 1");

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.reason, BalanceChangeReason::Withdrawal);
        assert_eq!(event.new_balance, Amount::from_minor(600_000_000));
    }

    #[tokio::test]
    async fn begin_without_funds_is_rejected() {
        let h = harness("0").await;
        assert!(matches!(
            h.wallet.begin_withdrawal(1).await,
            Err(WithdrawalError::NoFunds)
        ));
        assert!(matches!(
            h.wallet.begin_withdrawal(99).await,
            Err(WithdrawalError::NoFunds)
        ));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::Idle);
    }

    #[tokio::test]
    async fn invalid_amounts_keep_state() {
        let h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();

        for text in ["abc", "0", "-1", "", "0.0000000001"] {
            assert!(matches!(
                h.wallet.submit_withdrawal_amount(1, text).await,
                Err(WithdrawalError::InvalidAmount(_))
            ));
        }
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAmount);
    }

    #[tokio::test]
    async fn amount_above_balance_is_rejected() {
        let h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();

        let result = h.wallet.submit_withdrawal_amount(1, "1.5").await;
        assert!(matches!(
            result,
            Err(WithdrawalError::InsufficientFunds(balance, requested))
                if balance == Amount::from_units(1) && requested == Amount::from_minor(1_500_000_000)
        ));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAmount);
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_units(1));

        // the whole balance is fine
        h.wallet.submit_withdrawal_amount(1, "1").await.unwrap();
    }

    #[tokio::test]
    async fn invalid_address_keeps_state() {
        let h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();
        let amount = h.wallet.submit_withdrawal_amount(1, "0.5").await.unwrap();

        let result = h.wallet.submit_withdrawal_address(1, "XY1234").await;
        assert!(matches!(
            result,
            Err(WithdrawalError::InvalidAddress(AddressError::WrongPrefix(_)))
        ));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAddress { amount });
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_units(1));
    }

    #[tokio::test]
    async fn balance_drained_between_steps_aborts() {
        let mut h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();
        h.wallet.submit_withdrawal_amount(1, "0.8").await.unwrap();

        // concurrent spend elsewhere
        h.ledger.apply_delta(1, Amount::from_minor(-500_000_000)).await.unwrap();

        let result = h.wallet.submit_withdrawal_address(1, ADDRESS).await;
        assert!(matches!(result, Err(WithdrawalError::InsufficientFunds(_, _))));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::Cancelled);
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_minor(500_000_000));
        assert!(h.transfers.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_has_no_ledger_effect() {
        let mut h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();
        h.wallet.submit_withdrawal_amount(1, "0.5").await.unwrap();

        h.wallet.cancel_withdrawal(1).await.unwrap();
        assert_eq!(h.wallet.state(1).await, WithdrawalState::Cancelled);
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_units(1));
        assert!(h.transfers.try_recv().is_err());

        assert!(matches!(
            h.wallet.cancel_withdrawal(1).await,
            Err(WithdrawalError::NotInProgress)
        ));
    }

    #[tokio::test]
    async fn steps_out_of_order_are_rejected() {
        let h = harness("1.0").await;
        assert!(matches!(
            h.wallet.submit_withdrawal_amount(1, "0.5").await,
            Err(WithdrawalError::NotInProgress)
        ));

        h.wallet.begin_withdrawal(1).await.unwrap();
        assert!(matches!(
            h.wallet.submit_withdrawal_address(1, ADDRESS).await,
            Err(WithdrawalError::OutOfOrder(WithdrawalState::AwaitingAmount))
        ));

        h.wallet.submit_withdrawal_amount(1, "0.5").await.unwrap();
        assert!(matches!(
            h.wallet.submit_withdrawal_amount(1, "0.5").await,
            Err(WithdrawalError::OutOfOrder(WithdrawalState::AwaitingAddress { .. }))
        ));
    }

    #[tokio::test]
    async fn finished_dialogue_accepts_no_more_steps() {
        let mut h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();
        h.wallet.submit_withdrawal_amount(1, "0.5").await.unwrap();
        h.wallet.submit_withdrawal_address(1, ADDRESS).await.unwrap();

        assert!(matches!(
            h.wallet.submit_withdrawal_address(1, ADDRESS).await,
            Err(WithdrawalError::NotInProgress)
        ));
        assert!(matches!(
            h.wallet.submit_withdrawal_amount(1, "0.1").await,
            Err(WithdrawalError::NotInProgress)
        ));
        assert!(matches!(
            h.wallet.cancel_withdrawal(1).await,
            Err(WithdrawalError::NotInProgress)
        ));
        assert_eq!(h.wallet.state(1).await, WithdrawalState::Submitted);
        assert_eq!(h.ledger.get_balance(1).await.unwrap(), Amount::from_minor(500_000_000));
        assert!(h.transfers.recv().await.is_some());
        assert!(h.transfers.try_recv().is_err());

        // a new dialogue replaces the finished one
        h.wallet.begin_withdrawal(1).await.unwrap();
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAmount);
    }

    #[tokio::test]
    async fn begin_again_restarts_dialogue() {
        let h = harness("1.0").await;
        h.wallet.begin_withdrawal(1).await.unwrap();
        h.wallet.submit_withdrawal_amount(1, "0.5").await.unwrap();

        h.wallet.begin_withdrawal(1).await.unwrap();
        assert_eq!(h.wallet.state(1).await, WithdrawalState::AwaitingAmount);
        assert_eq!(h.wallet.open_sessions(), 1);
    }

    #[tokio::test]
    async fn transfer_hand_over_failure_keeps_debit() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.apply_delta(1, Amount::from_units(1)).await.unwrap();
        let (queue, transfers) = TransferQueue::new();
        drop(transfers);
        let wallet = Wallet::new(
            ledger.clone(),
            Arc::new(queue),
            Arc::new(crate::notify::LogSink),
            Arc::new(TonAddressValidator::default()),
        );

        wallet.begin_withdrawal(1).await.unwrap();
        wallet.submit_withdrawal_amount(1, "1").await.unwrap();
        let receipt = wallet.submit_withdrawal_address(1, ADDRESS).await.unwrap();

        assert_eq!(receipt.new_balance, Amount::ZERO);
        assert_eq!(ledger.get_balance(1).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_stale_sessions() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.apply_delta(1, Amount::from_units(1)).await.unwrap();
        ledger.apply_delta(2, Amount::from_units(1)).await.unwrap();
        let (queue, _transfers) = TransferQueue::new();
        let wallet = Wallet::new(
            ledger,
            Arc::new(queue),
            Arc::new(crate::notify::LogSink),
            Arc::new(TonAddressValidator::default()),
        );

        wallet.begin_withdrawal(1).await.unwrap();
        tokio::time::advance(Duration::from_secs(500)).await;
        wallet.begin_withdrawal(2).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(wallet.purge_expired(Duration::from_secs(600)), 1);
        assert_eq!(wallet.state(1).await, WithdrawalState::Idle);
        assert_eq!(wallet.state(2).await, WithdrawalState::AwaitingAmount);
    }
}
