//! Source of recent incoming transactions for the watched address.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::RawTransaction;

mod toncenter;
pub use toncenter::TonCenterFeed;

/// Transport, timeout, status or decoding failure. Always transient for the caller.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("chain feed unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChainFeed: Send + Sync {
    /// The most recent `limit` transactions of `address` at call time.
    /// Batches may overlap or reorder across calls.
    async fn fetch_recent(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<RawTransaction>, FeedError>;
}
