//! Configuration management for the server.

use ledgerbridge_engine::config::{
    DEFAULT_ACCOUNT_PREFIX, DEFAULT_ADJUSTMENT_LIMIT, DEFAULT_LOOKBACK_DAYS,
};
use ledgerbridge_engine::{ConversionRate, Currency, SyncConfig};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Location of the sync state file
    pub state_path: PathBuf,
    /// Base URL of the member (points) API
    pub member_api_url: String,
    pub member_api_token: Option<String>,
    /// Family whose members are synced
    pub family_id: String,
    /// Base URL of the ledger API
    pub ledger_api_url: String,
    pub ledger_api_token: Option<String>,
    pub account_prefix: String,
    pub rate: ConversionRate,
    pub currency: Currency,
    pub adjustment_limit: i64,
    pub lookback_days: u32,
    pub call_timeout: Duration,
    pub run_timeout: Duration,
    /// Interval of scheduled runs; `None` disables the scheduler
    pub schedule_interval: Option<Duration>,
    /// Bearer token required by `POST /trigger` when set
    pub auth_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse(&var, "PORT", 3000)?;
        let state_path = var("STATE_PATH")
            .unwrap_or_else(|| "./ledgerbridge-state.json".to_string())
            .into();

        let member_api_url = required("MEMBER_API_URL")?;
        let family_id = required("FAMILY_ID")?;
        let ledger_api_url = required("LEDGER_API_URL")?;

        let exponent = parse(&var, "CURRENCY_EXPONENT", 2u32)?;
        let code = var("CURRENCY").unwrap_or_else(|| "USD".to_string());
        let currency =
            Currency::new(code, exponent).map_err(|e| ConfigError::invalid("CURRENCY", e))?;
        let rate_text = var("CONVERSION_RATE").unwrap_or_else(|| "0.10".to_string());
        let rate = ConversionRate::from_decimal(&rate_text, exponent)
            .map_err(|e| ConfigError::invalid("CONVERSION_RATE", e))?;

        let call_timeout = Duration::from_secs(parse(&var, "CALL_TIMEOUT_SECS", 20u64)?);
        let run_timeout = Duration::from_secs(parse(&var, "RUN_TIMEOUT_SECS", 130u64)?);
        let schedule_secs = parse(&var, "SCHEDULE_INTERVAL_SECS", 3600u64)?;

        let config = Self {
            host,
            port,
            state_path,
            member_api_url,
            member_api_token: var("MEMBER_API_TOKEN"),
            family_id,
            ledger_api_url,
            ledger_api_token: var("LEDGER_API_TOKEN"),
            account_prefix: lookup("LEDGER_ACCOUNT_PREFIX")
                .unwrap_or_else(|| DEFAULT_ACCOUNT_PREFIX.to_string()),
            rate,
            currency,
            adjustment_limit: parse(&var, "ADJUSTMENT_LIMIT", DEFAULT_ADJUSTMENT_LIMIT)?,
            lookback_days: parse(&var, "PULL_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?,
            call_timeout,
            run_timeout,
            schedule_interval: (schedule_secs > 0).then_some(Duration::from_secs(schedule_secs)),
            auth_secret: var("AUTH_SECRET"),
        };

        config
            .sync_config()
            .validate()
            .map_err(|e| ConfigError::Engine(e.to_string()))?;
        Ok(config)
    }

    /// Engine configuration derived from this server configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(self.family_id.clone(), self.rate, self.currency.clone())
            .with_account_prefix(self.account_prefix.clone())
            .with_adjustment_limit(self.adjustment_limit)
            .with_lookback_days(self.lookback_days)
            .with_timeouts(self.call_timeout, self.run_timeout)
    }
}

fn parse<T, V>(var: &V, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, e)),
        None => Ok(default),
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state_path", &self.state_path)
            .field("member_api_url", &self.member_api_url)
            .field("member_api_token", &redact(&self.member_api_token))
            .field("family_id", &self.family_id)
            .field("ledger_api_url", &self.ledger_api_url)
            .field("ledger_api_token", &redact(&self.ledger_api_token))
            .field("account_prefix", &self.account_prefix)
            .field("rate", &self.rate.to_string())
            .field("currency", &self.currency.code)
            .field("adjustment_limit", &self.adjustment_limit)
            .field("lookback_days", &self.lookback_days)
            .field("call_timeout", &self.call_timeout)
            .field("run_timeout", &self.run_timeout)
            .field("schedule_interval", &self.schedule_interval)
            .field("auth_secret", &redact(&self.auth_secret))
            .finish()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid sync configuration: {0}")]
    Engine(String),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl fmt::Display) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.to_string(),
        }
    }
}
