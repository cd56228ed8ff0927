//! Frozen runtime configuration.
//!
//! Parsed once from the environment at startup into an immutable value; no
//! component reads the environment afterwards. Missing required keys fail
//! the process with SEC-040 before anything else is constructed.

use crate::domain::errors::ConfigError;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,

    // Webhook ingress
    pub webhook_hmac_secret: String,
    pub ingress_queue_capacity: usize,

    // HITL gateway
    pub hitl_enabled: bool,
    pub hitl_timeout_seconds: u64,
    pub hitl_slippage_max_percent: Decimal,
    pub hitl_allowed_operators: HashSet<String>,
    pub api_bearer_token: String,

    // Guardian
    pub guardian_daily_loss_limit_pct: Decimal,

    // Risk governor
    pub max_risk_zar: Decimal,
    pub min_trade_zar: Decimal,
    pub lot_size: Decimal,

    // Exchange
    pub mock_mode: bool,
    pub exchange_base_url: String,
    pub exchange_api_key: String,
    pub exchange_api_secret: String,

    // Observability
    pub vitals_interval_seconds: u64,
    pub discord_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse from an arbitrary lookup. Keeps the parsing logic testable
    /// without mutating process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let webhook_hmac_secret = require(&get, "WEBHOOK_HMAC_SECRET")?;
        let api_bearer_token = require(&get, "API_BEARER_TOKEN")?;

        let hitl_enabled = parse_or(&get, "HITL_ENABLED", true)?;

        let hitl_allowed_operators: HashSet<String> = get("HITL_ALLOWED_OPERATORS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if hitl_enabled && hitl_allowed_operators.is_empty() {
            return Err(ConfigError::Missing {
                key: "HITL_ALLOWED_OPERATORS",
            });
        }

        let mock_mode = parse_or(&get, "MOCK_MODE", false)?;
        let (exchange_api_key, exchange_api_secret) = if mock_mode {
            (
                get("EXCHANGE_API_KEY").unwrap_or_default(),
                get("EXCHANGE_API_SECRET").unwrap_or_default(),
            )
        } else {
            (
                require(&get, "EXCHANGE_API_KEY")?,
                require(&get, "EXCHANGE_API_SECRET")?,
            )
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://tradewarden.db".to_string()),
            webhook_hmac_secret,
            ingress_queue_capacity: parse_or(&get, "INGRESS_QUEUE_CAPACITY", 256usize)?,
            hitl_enabled,
            hitl_timeout_seconds: parse_or(&get, "HITL_TIMEOUT_SECONDS", 300u64)?,
            hitl_slippage_max_percent: parse_decimal_or(
                &get,
                "HITL_SLIPPAGE_MAX_PERCENT",
                "0.5",
            )?,
            hitl_allowed_operators,
            api_bearer_token,
            guardian_daily_loss_limit_pct: parse_decimal_or(
                &get,
                "GUARDIAN_DAILY_LOSS_LIMIT_PCT",
                "0.01",
            )?,
            max_risk_zar: parse_decimal_or(&get, "MAX_RISK_ZAR", "5000.00")?,
            min_trade_zar: parse_decimal_or(&get, "MIN_TRADE_ZAR", "50.00")?,
            lot_size: parse_decimal_or(&get, "LOT_SIZE", "0.0001")?,
            mock_mode,
            exchange_base_url: get("EXCHANGE_BASE_URL")
                .unwrap_or_else(|| "https://api.valr.com".to_string()),
            exchange_api_key,
            exchange_api_secret,
            vitals_interval_seconds: parse_or(&get, "VITALS_INTERVAL_SECONDS", 60u64)?,
            discord_webhook_url: get("DISCORD_WEBHOOK_URL").filter(|s| !s.is_empty()),
        })
    }
}

fn require(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    match get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing { key }),
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

fn parse_decimal_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let raw = get(key).unwrap_or_else(|| default.to_string());
    Decimal::from_str_exact(raw.trim()).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}
