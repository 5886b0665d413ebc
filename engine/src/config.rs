//! Run configuration shared by both sync directions.

use crate::{error::Result, ConversionRate, Currency, Error, Points};
use std::time::Duration;

/// Default account naming prefix, e.g. `"Points: Ada"`.
pub const DEFAULT_ACCOUNT_PREFIX: &str = "Points: ";

/// Largest single point adjustment the member system accepts.
pub const DEFAULT_ADJUSTMENT_LIMIT: Points = 1000;

/// How far back the first pull of an account looks.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Hard ceiling for a whole run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(130);

/// Everything a reconciliation run needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Family whose members are synced
    pub family_id: String,
    pub rate: ConversionRate,
    pub currency: Currency,
    /// Ledger accounts are named `{account_prefix}{display_name}`
    pub account_prefix: String,
    /// Maximum magnitude of a single pulled point adjustment
    pub adjustment_limit: Points,
    /// Watermark for accounts that have never been pulled
    pub lookback_days: u32,
    /// Timeout for each external call
    pub call_timeout: Duration,
    /// Timeout for the whole run
    pub run_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration with default limits and timeouts.
    pub fn new(family_id: impl Into<String>, rate: ConversionRate, currency: Currency) -> Self {
        Self {
            family_id: family_id.into(),
            rate,
            currency,
            account_prefix: DEFAULT_ACCOUNT_PREFIX.to_string(),
            adjustment_limit: DEFAULT_ADJUSTMENT_LIMIT,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_account_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.account_prefix = prefix.into();
        self
    }

    pub fn with_adjustment_limit(mut self, limit: Points) -> Self {
        self.adjustment_limit = limit;
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_timeouts(mut self, call_timeout: Duration, run_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self.run_timeout = run_timeout;
        self
    }

    /// Ledger account name for a member display name.
    pub fn account_name(&self, display_name: &str) -> String {
        format!("{}{}", self.account_prefix, display_name)
    }

    /// Reject configurations a run cannot safely start with.
    pub fn validate(&self) -> Result<()> {
        if self.family_id.trim().is_empty() {
            return Err(Error::InvalidConfig("family id is empty".into()));
        }
        if self.adjustment_limit <= 0 {
            return Err(Error::InvalidConfig(format!(
                "adjustment limit must be positive, got {}",
                self.adjustment_limit
            )));
        }
        if self.call_timeout.is_zero() || self.run_timeout.is_zero() {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig::new(
            "family-1",
            ConversionRate::new(10, 1).unwrap(),
            Currency::new("USD", 2).unwrap(),
        )
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.adjustment_limit, 1000);
        assert_eq!(config.run_timeout, Duration::from_secs(130));
        assert_eq!(config.account_name("Ada"), "Points: Ada");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn custom_prefix() {
        let config = config().with_account_prefix("Kid - ");
        assert_eq!(config.account_name("Ada"), "Kid - Ada");
    }

    #[test]
    fn validation_failures() {
        assert!(config().with_adjustment_limit(0).validate().is_err());
        assert!(config()
            .with_timeouts(Duration::ZERO, Duration::from_secs(1))
            .validate()
            .is_err());

        let mut blank = config();
        blank.family_id = "  ".into();
        assert!(matches!(blank.validate(), Err(Error::InvalidConfig(_))));
    }
}
