//! Configuration loaded from a TOML file.
//!
//! Every section falls back to its defaults, so an empty file is a valid
//! (if unusable) configuration; `validate` catches what must be set.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;
use crate::model::AccountId;
use crate::reconcile::ReconcilerConfig;

pub const API_KEY_ENV: &str = "TONCENTER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub feed: FeedConfig,
    pub reconcile: ReconcileConfig,
    pub attribution: AttributionConfig,
    pub withdrawal: WithdrawalConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://custody.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Custodial deposit address to watch.
    pub address: String,
    pub limit: u32,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://toncenter.com/api/v2".to_string(),
            api_key: String::new(),
            address: String::new(),
            limit: 20,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Decimal asset units, e.g. "0.1".
    pub min_deposit: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            min_deposit: "0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionStrategy {
    #[default]
    Memo,
    Address,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub strategy: AttributionStrategy,
    pub memo_prefix: String,
    /// Registered address -> user id, for the `address` strategy.
    pub addresses: HashMap<String, AccountId>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    pub session_ttl_secs: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 600,
        }
    }
}

impl Config {
    /// Read, apply the environment override and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and apply the environment override without validating;
    /// enough for commands that only touch the ledger.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.feed.api_key = key;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.feed.address.trim().is_empty() {
            errors.push("feed.address must be set".to_string());
        }
        if !(1..=256).contains(&self.feed.limit) {
            errors.push("feed.limit must be between 1 and 256".to_string());
        }
        if self.feed.timeout_secs == 0 {
            errors.push("feed.timeout_secs must be positive".to_string());
        }
        if self.reconcile.interval_secs == 0 {
            errors.push("reconcile.interval_secs must be positive".to_string());
        }
        match self.reconcile.min_deposit.parse::<Amount>() {
            Ok(amount) if amount.is_positive() => {}
            _ => errors.push(format!(
                "reconcile.min_deposit '{}' is not a positive amount",
                self.reconcile.min_deposit
            )),
        }
        if self.withdrawal.session_ttl_secs == 0 {
            errors.push("withdrawal.session_ttl_secs must be positive".to_string());
        }
        if self.ledger.max_connections == 0 {
            errors.push("ledger.max_connections must be positive".to_string());
        }
        if self.attribution.strategy == AttributionStrategy::Address
            && self.attribution.addresses.is_empty()
        {
            errors.push("attribution.addresses is empty for the address strategy".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn reconciler(&self) -> Result<ReconcilerConfig, ConfigError> {
        let min_deposit = self
            .reconcile
            .min_deposit
            .parse::<Amount>()
            .map_err(|e| ConfigError::Invalid(vec![format!("reconcile.min_deposit: {e}")]))?;
        Ok(ReconcilerConfig {
            address: self.feed.address.clone(),
            limit: self.feed.limit,
            interval: Duration::from_secs(self.reconcile.interval_secs),
            min_deposit,
        })
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.withdrawal.session_ttl_secs)
    }
}
