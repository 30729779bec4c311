//! Policies mapping an anonymous incoming transaction to an account.

use dashmap::DashMap;
use thiserror::Error;

use crate::model::{AccountId, RawTransaction};

/// Internal only: surfaces as an `unattributed` record, never to a user.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("attribution failed: {0}")]
pub struct AttributionFailed(pub String);

pub trait Attribution: Send + Sync {
    fn attribute(&self, tx: &RawTransaction) -> Result<AccountId, AttributionFailed>;
}

/// The deposit comment carries the user id, optionally behind a prefix such as `uid:`.
#[derive(Debug, Clone, Default)]
pub struct MemoAttribution {
    prefix: String,
}

impl MemoAttribution {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Attribution for MemoAttribution {
    fn attribute(&self, tx: &RawTransaction) -> Result<AccountId, AttributionFailed> {
        let memo = tx
            .metadata
            .memo
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| AttributionFailed("no memo".to_string()))?;

        let id = memo
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| AttributionFailed(format!("memo '{memo}' lacks prefix '{}'", self.prefix)))?
            .trim();

        match id.parse::<AccountId>() {
            Ok(account) if account > 0 => Ok(account),
            _ => Err(AttributionFailed(format!("memo '{memo}' is not a user id"))),
        }
    }
}

/// Registered addresses: a per-user deposit address (matched on the message
/// destination) or a user's own sending wallet (matched on the source).
#[derive(Debug, Default)]
pub struct AddressBookAttribution {
    addresses: DashMap<String, AccountId>,
}

impl AddressBookAttribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, account: AccountId) {
        self.addresses.insert(address.into(), account);
    }
}

impl FromIterator<(String, AccountId)> for AddressBookAttribution {
    fn from_iter<I: IntoIterator<Item = (String, AccountId)>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

impl Attribution for AddressBookAttribution {
    fn attribute(&self, tx: &RawTransaction) -> Result<AccountId, AttributionFailed> {
        [tx.metadata.destination.as_str(), tx.source.as_str()]
            .into_iter()
            .filter(|address| !address.is_empty())
            .find_map(|address| self.addresses.get(address).map(|r| *r.value()))
            .ok_or_else(|| {
                AttributionFailed(format!("no account registered for source {}", tx.source))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxMetadata;

    fn tx_with(source: &str, destination: &str, memo: Option<&str>) -> RawTransaction {
        RawTransaction {
            hash: "h".to_string(),
            source: source.to_string(),
            value_minor: 1,
            metadata: TxMetadata {
                destination: destination.to_string(),
                memo: memo.map(str::to_string),
                ..TxMetadata::default()
            },
        }
    }

    #[test]
    fn memo_with_plain_user_id() {
        let policy = MemoAttribution::default();
        assert_eq!(policy.attribute(&tx_with("EQs", "EQd", Some(" 42 "))), Ok(42));
    }

    #[test]
    fn memo_with_prefix() {
        let policy = MemoAttribution::new("uid:");
        assert_eq!(policy.attribute(&tx_with("EQs", "EQd", Some("uid:42"))), Ok(42));
        assert!(policy.attribute(&tx_with("EQs", "EQd", Some("42"))).is_err());
    }

    #[test]
    fn memo_missing_or_garbage_fails() {
        let policy = MemoAttribution::default();
        assert!(policy.attribute(&tx_with("EQs", "EQd", None)).is_err());
        assert!(policy.attribute(&tx_with("EQs", "EQd", Some("  "))).is_err());
        assert!(policy.attribute(&tx_with("EQs", "EQd", Some("thanks!"))).is_err());
        assert!(policy.attribute(&tx_with("EQs", "EQd", Some("-5"))).is_err());
        assert!(policy.attribute(&tx_with("EQs", "EQd", Some("0"))).is_err());
    }

    #[test]
    fn address_book_matches_destination_then_source() {
        let book: AddressBookAttribution =
            [("EQdeposit7".to_string(), 7), ("EQwallet9".to_string(), 9)]
                .into_iter()
                .collect();

        assert_eq!(book.attribute(&tx_with("EQwallet9", "EQdeposit7", None)), Ok(7));
        assert_eq!(book.attribute(&tx_with("EQwallet9", "EQshared", None)), Ok(9));
        assert!(book.attribute(&tx_with("EQother", "EQshared", None)).is_err());
    }

    #[test]
    fn address_book_register_at_runtime() {
        let book = AddressBookAttribution::new();
        assert!(book.attribute(&tx_with("EQa", "EQshared", None)).is_err());
        book.register("EQa", 3);
        assert_eq!(book.attribute(&tx_with("EQa", "EQshared", None)), Ok(3));
    }
}
