use lotto_execution::{DrawClock, LOCK_WINDOW_MS, TICKET_COST};
use lotto_types::{Currency, PayoutTier, TierTable, TierTableError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

/// Configuration of the simulator, as read from YAML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long before the draw date ticket sales close.
    #[serde(default = "default_lock_window_ms")]
    pub lock_window_ms: u64,
    /// Price of one ticket in minor units.
    #[serde(default = "default_ticket_cost")]
    pub ticket_cost: u64,
    #[serde(default = "default_accepted_currencies")]
    pub accepted_currencies: Vec<String>,
    /// Replaces the built-in payout table when set.
    #[serde(default)]
    pub payout_tiers: Option<Vec<PayoutTier>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("unknown currency in accepted_currencies: {value}")]
    UnknownCurrency { value: String },
    #[error("accepted_currencies must not be empty")]
    NoCurrencies,
    #[error("invalid payout_tiers: {0}")]
    InvalidPayoutTiers(#[from] TierTableError),
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub log_level: Level,
    pub clock: DrawClock,
    pub ticket_cost: u64,
    pub accepted_currencies: Vec<Currency>,
    pub payout_table: TierTable,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lock_window_ms() -> u64 {
    LOCK_WINDOW_MS
}

fn default_ticket_cost() -> u64 {
    TICKET_COST
}

fn default_accepted_currencies() -> Vec<String> {
    Currency::ALL
        .iter()
        .map(|currency| currency.code().to_string())
        .collect()
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            lock_window_ms: default_lock_window_ms(),
            ticket_cost: default_ticket_cost(),
            accepted_currencies: default_accepted_currencies(),
            payout_tiers: None,
        }
    }
}

impl Config {
    /// Read a YAML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        ensure_nonzero("lock_window_ms", self.lock_window_ms)?;
        ensure_nonzero("ticket_cost", self.ticket_cost)?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        let mut accepted_currencies = Vec::with_capacity(self.accepted_currencies.len());
        for value in &self.accepted_currencies {
            let currency = value
                .parse::<Currency>()
                .map_err(|_| ConfigError::UnknownCurrency {
                    value: value.clone(),
                })?;
            if !accepted_currencies.contains(&currency) {
                accepted_currencies.push(currency);
            }
        }
        if accepted_currencies.is_empty() {
            return Err(ConfigError::NoCurrencies);
        }

        let payout_table = match self.payout_tiers {
            Some(tiers) => TierTable::new(tiers)?,
            None => TierTable::default(),
        };

        Ok(ValidatedConfig {
            log_level,
            clock: DrawClock::new(self.lock_window_ms),
            ticket_cost: self.ticket_cost,
            accepted_currencies,
            payout_table,
        })
    }
}
