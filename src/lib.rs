pub mod amount;
pub mod config;
pub mod csv;
pub mod feed;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod shutdown;
pub mod transfer;
pub mod wallet;

pub use amount::Amount;
pub use ledger::{Ledger, LedgerError, MemoryLedger, SqliteLedger};
pub use model::{AccountId, ProcessedTransaction, RawTransaction, TxHash, TxStatus};
pub use reconcile::{Reconciler, ReconcilerConfig, TickReport};
pub use wallet::{Wallet, WithdrawalError, WithdrawalState};
