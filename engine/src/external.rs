//! Contracts for the two external systems the engine reconciles.
//!
//! The engine never talks to a socket itself. The server crate provides HTTP
//! implementations of [`MemberDirectory`] and [`Ledger`]; tests use the
//! in-memory fakes from [`crate::fake`].

use crate::{AccountId, IdempotencyId, LedgerTxId, MemberId, MinorUnits, Points};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A member of the points system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
    /// Current point balance, owned by the member system
    pub points: Points,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, display_name: impl Into<String>, points: Points) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            points,
        }
    }
}

/// A ledger account holding one member's money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub id: AccountId,
    pub name: String,
}

/// A transaction as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: LedgerTxId,
    pub account_id: AccountId,
    /// Signed amount in minor units; positive is a deposit
    pub amount: MinorUnits,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    /// Idempotency id supplied at creation; `None` for hand-entered rows
    #[serde(default)]
    pub idempotency_id: Option<IdempotencyId>,
}

/// A transaction the engine asks the ledger to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerTransaction {
    pub amount: MinorUnits,
    pub date: NaiveDate,
    pub notes: String,
    pub idempotency_id: IdempotencyId,
}

/// Failure of a single call to an external system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("request timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request could not be encoded: {0}")]
    Encode(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// The points system.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), ExternalError>;

    async fn list_members(&self, family_id: &str) -> Result<Vec<Member>, ExternalError>;

    /// Add `delta` points (negative to deduct). The member system enforces its
    /// own magnitude limit and may reject the request.
    async fn adjust_points(
        &self,
        member_id: &str,
        delta: Points,
        reason: &str,
    ) -> Result<(), ExternalError>;
}

/// The double-entry ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), ExternalError>;

    async fn find_account_by_name(&self, name: &str)
        -> Result<Option<LedgerAccount>, ExternalError>;

    /// Transactions of an account dated on or after `since`.
    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<LedgerTransaction>, ExternalError>;

    async fn create_transaction(
        &self,
        account_id: &str,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, ExternalError>;
}
