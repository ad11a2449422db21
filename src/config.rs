use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::currency::{RateTable, RateTableError};
use crate::error::LedgerError;
use crate::ledger::CommissionPolicy;
use crate::types::CommissionStatus;

/// Service configuration.
///
/// Sources, lowest priority first: built-in defaults, an optional
/// `ledger.toml` (or the file named by `LEDGER_CONFIG`), then environment
/// variables. Nested keys use `__`, e.g. `CURRENCY_RATES__GHS=12.5`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub reference_currency: String,
    /// Units of each currency per one unit of `reference_currency`.
    pub currency_rates: HashMap<String, Decimal>,
    /// System default rate applied when an affiliate has no override.
    pub default_commission_rate: Decimal,
    pub initial_commission_status: CommissionStatus,
    pub renewal_url: String,
    pub notification_webhook_url: Option<String>,
    pub sweep_interval_secs: Option<u64>,
    pub leaderboard_page_size: u32,
}

// Lowercase to match keys coming from the environment source.
const DEFAULT_RATES: [(&str, &str); 7] = [
    ("usd", "1"),
    ("ghs", "12"),
    ("ngn", "1550"),
    ("kes", "129"),
    ("zar", "18"),
    ("eur", "0.92"),
    ("gbp", "0.79"),
];

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let file = std::env::var("LEDGER_CONFIG").unwrap_or_else(|_| "ledger".to_string());
        let config = Self::defaults()?
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        config.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("max_connections", 8)?
            .set_default("reference_currency", "USD")?
            .set_default("default_commission_rate", "0.60")?
            .set_default("initial_commission_status", "available")?
            .set_default("renewal_url", "https://example.com/memberships/renew")?
            .set_default("leaderboard_page_size", 20)?;
        for (code, rate) in DEFAULT_RATES {
            builder = builder.set_default(format!("currency_rates.{code}"), rate)?;
        }
        Ok(builder)
    }

    pub fn commission_policy(&self) -> Result<CommissionPolicy, LedgerError> {
        Ok(CommissionPolicy::new(self.default_commission_rate)?
            .with_initial_status(self.initial_commission_status))
    }

    pub fn rate_table(&self) -> Result<RateTable, RateTableError> {
        RateTable::new(
            &self.reference_currency,
            self.currency_rates
                .iter()
                .map(|(code, rate)| (code.clone(), *rate)),
        )
    }
}
