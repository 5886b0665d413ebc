//! Error types for the Ledgerbridge engine.
//!
//! These are the configuration and state errors that abort a run. Errors that
//! only affect a single member or ledger transaction are not raised here; they
//! are collected as [`SyncIssue`](crate::SyncIssue)s in the run report.

use thiserror::Error;

/// All fatal errors from the Ledgerbridge engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("invalid conversion rate: {0}")]
    InvalidRate(String),

    #[error("invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Value errors
    #[error("invalid packed date {value}: {reason}")]
    InvalidPackedDate { value: i64, reason: String },

    #[error("amount overflow converting {0}")]
    AmountOverflow(i64),

    // State errors
    #[error("invalid sync state: {0}")]
    InvalidState(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidRate("rate must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid conversion rate: rate must be positive"
        );

        let err = Error::InvalidPackedDate {
            value: 20241301,
            reason: "month 13 out of range".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid packed date 20241301: month 13 out of range"
        );

        let err = Error::InvalidState("unexpected end of input".into());
        assert_eq!(err.to_string(), "invalid sync state: unexpected end of input");
    }
}
