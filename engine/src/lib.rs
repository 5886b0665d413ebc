//! # Ledgerbridge Engine
//!
//! Bidirectional reconciliation between a points system and a double-entry
//! ledger.
//!
//! Points earned or spent in the member system become ledger transactions
//! (push). Transactions entered by hand in the ledger become point
//! adjustments (pull). Both directions are idempotent and the engine never
//! re-imports its own writes.
//!
//! ## Design Principles
//!
//! - **No direct IO**: external systems sit behind the [`MemberDirectory`] and
//!   [`Ledger`] traits; persistence of [`SyncState`] is the caller's job
//! - **Exact money**: amounts are integer minor units, conversion uses
//!   banker's rounding on integers
//! - **Partial failure is normal**: one member failing never aborts a run
//!
//! ## Core Concepts
//!
//! ### Sync state
//!
//! [`SyncState`] remembers which pushes and pulls already happened and each
//! member's balance at the last sync. It is the only memory the engine has
//! between runs.
//!
//! ### Idempotency ids
//!
//! Every engine-created ledger transaction carries `push:{member}:{date}`.
//! That id makes a repeated push a no-op and lets the pull phase recognise
//! the engine's own writes even if the state file was lost.
//!
//! ### Runs
//!
//! The [`Orchestrator`] runs a preflight check, then the push phase, then
//! the pull phase, and returns a [`SyncReport`] together with the updated
//! state.
//!
//! ## Quick Start
//!
//! ```rust
//! use ledgerbridge_engine::{ConversionRate, Currency, points_to_amount};
//!
//! // 0.10 USD per point
//! let rate = ConversionRate::from_decimal("0.10", 2).unwrap();
//! let amount = points_to_amount(15, &rate).unwrap();
//! assert_eq!(amount, 150);
//!
//! let usd = Currency::new("USD", 2).unwrap();
//! assert_eq!(usd.format(amount), "1.50 USD");
//! ```

mod accounts;
mod budget;
pub mod config;
pub mod conversion;
pub mod date;
pub mod error;
pub mod external;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod idempotency;
pub mod orchestrator;
pub mod pull;
pub mod push;
pub mod report;
pub mod state;

// Re-export main types at crate root
pub use config::SyncConfig;
pub use conversion::{amount_to_points, points_to_amount, ConversionRate, Currency};
pub use date::{decode_packed_date, earliest_packed_date, encode_packed_date, PackedDate};
pub use error::Error;
pub use external::{
    ExternalError, Ledger, LedgerAccount, LedgerTransaction, Member, MemberDirectory,
    NewLedgerTransaction,
};
pub use orchestrator::{Orchestrator, RunOutcome, RunRequest};
pub use pull::{classify, PullDecision};
pub use push::{compute_delta, Delta};
pub use report::{
    Direction, IssueKind, Phase, PlannedChange, RunOptions, RunState, RunStatus, SyncIssue,
    SyncReport,
};
pub use state::{
    PendingEntry, PulledEntry, PushedEntry, StateSummary, SyncState, STATE_FORMAT_VERSION,
};

/// Type aliases for clarity
pub type MemberId = String;
pub type AccountId = String;
pub type LedgerTxId = String;
pub type IdempotencyId = String;
pub type Points = i64;
/// Money in the currency's smallest unit (cents for USD)
pub type MinorUnits = i64;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
