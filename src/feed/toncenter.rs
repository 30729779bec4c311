//! TonCenter v2 `getTransactions` adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use super::{ChainFeed, FeedError};
use crate::model::{RawTransaction, TxMetadata};

const API_KEY_HEADER: &str = "X-API-Key";

pub struct TonCenterFeed {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl TonCenterFeed {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_ok")]
    ok: bool,
    /// Decoded item by item so one odd entry does not hide the rest.
    #[serde(default)]
    result: Vec<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ApiTransaction {
    transaction_id: TransactionId,
    #[serde(default)]
    utime: Option<i64>,
    #[serde(default)]
    in_msg: Option<InMessage>,
}

#[derive(Debug, Deserialize)]
struct TransactionId {
    hash: String,
    #[serde(default)]
    lt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InMessage {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(default, deserialize_with = "string_or_number")]
    value: i64,
    #[serde(default)]
    message: Option<String>,
}

/// TonCenter encodes nano-values as JSON strings; accept plain numbers too.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(i64),
        Text(String),
    }

    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n),
        Value::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl From<ApiTransaction> for RawTransaction {
    fn from(tx: ApiTransaction) -> Self {
        let in_msg = tx.in_msg.unwrap_or(InMessage {
            source: String::new(),
            destination: String::new(),
            value: 0,
            message: None,
        });
        RawTransaction {
            hash: tx.transaction_id.hash,
            source: in_msg.source,
            value_minor: in_msg.value,
            metadata: TxMetadata {
                destination: in_msg.destination,
                memo: in_msg.message.filter(|m| !m.is_empty()),
                lt: tx.transaction_id.lt,
                utime: tx.utime,
            },
        }
    }
}

/// Convert the result items, dropping (and logging) those that do not decode.
fn decode_items(items: Vec<serde_json::Value>) -> Vec<RawTransaction> {
    items
        .into_iter()
        .filter_map(|item| {
            let hash = item
                .pointer("/transaction_id/hash")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();
            match serde_json::from_value::<ApiTransaction>(item) {
                Ok(tx) => Some(tx.into()),
                Err(e) => {
                    warn!(tx = %hash, reason = %e, "undecodable transaction skipped");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl ChainFeed for TonCenterFeed {
    async fn fetch_recent(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<RawTransaction>, FeedError> {
        let url = format!("{}/getTransactions", self.endpoint);
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("address", address), ("limit", limit.as_str())])
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Unavailable(format!("indexer returned {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| FeedError::Unavailable(format!("malformed response: {e}")))?;
        if !envelope.ok {
            let reason = envelope.error.unwrap_or_else(|| "ok=false".to_string());
            return Err(FeedError::Unavailable(reason));
        }

        let batch = decode_items(envelope.result);
        debug!(address, count = batch.len(), "fetched transactions");
        Ok(batch)
    }
}
