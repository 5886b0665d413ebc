//! Run options, statuses and the structured report returned by every run.

use crate::{IdempotencyId, LedgerTxId, MemberId, MinorUnits, Points, Timestamp};
use serde::{Deserialize, Serialize};

/// Which sync phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Push, then pull (default)
    #[default]
    Both,
    PushOnly,
    PullOnly,
}

impl Direction {
    pub fn includes_push(self) -> bool {
        matches!(self, Direction::Both | Direction::PushOnly)
    }

    pub fn includes_pull(self) -> bool {
        matches!(self, Direction::Both | Direction::PullOnly)
    }
}

/// Caller-selected options of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub direction: Direction,
    /// Compute and report changes without writing anything
    pub dry_run: bool,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    /// Configuration-level failure; no state was changed
    Failed,
}

/// Lifecycle of the orchestrator as seen from the trigger surface.
///
/// `Idle -> Running -> {Completed, CompletedWithErrors, Failed}`; a terminal
/// state is left again when the next run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::CompletedWithErrors => RunState::CompletedWithErrors,
            RunStatus::Failed => RunState::Failed,
        }
    }
}

/// Part of the run an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Checks before any phase runs, such as members that went missing
    Preflight,
    Push,
    Pull,
}

/// Classification of a per-item problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// No ledger account matches the member's naming convention
    AccountNotFound,
    AccountLookupFailed,
    /// Listing ledger transactions failed
    ListFailed,
    CreateFailed,
    AdjustFailed,
    /// Pulled amount converts to more points than one adjustment may carry
    AdjustmentExceedsLimit,
    Conversion,
    Timeout,
    /// Member known to the sync state is no longer listed by the member system
    MemberMissing,
    /// Whole-run ceiling reached; remaining items were not processed
    DeadlineExceeded,
}

/// A per-member or per-transaction problem. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub phase: Phase,
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<MemberId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_tx_id: Option<LedgerTxId>,
    pub message: String,
}

impl SyncIssue {
    pub fn new(phase: Phase, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            member_id: None,
            ledger_tx_id: None,
            message: message.into(),
        }
    }

    pub fn member(mut self, member_id: impl Into<MemberId>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    pub fn transaction(mut self, ledger_tx_id: impl Into<LedgerTxId>) -> Self {
        self.ledger_tx_id = Some(ledger_tx_id.into());
        self
    }
}

/// A write a dry run would have performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlannedChange {
    #[serde(rename_all = "camelCase")]
    Push {
        member_id: MemberId,
        idempotency_id: IdempotencyId,
        points: Points,
        amount: MinorUnits,
    },
    #[serde(rename_all = "camelCase")]
    Pull {
        member_id: MemberId,
        ledger_tx_id: LedgerTxId,
        points: Points,
        amount: MinorUnits,
    },
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub status: RunStatus,
    pub direction: Direction,
    pub dry_run: bool,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Ledger transactions created (or adopted after a crash)
    pub pushed: usize,
    /// Point adjustments applied
    pub pulled: usize,
    /// Items skipped: already synced, the engine's own writes, or amounts
    /// below one point
    pub skipped: usize,
    pub errors: Vec<SyncIssue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<PlannedChange>,
    /// Reason for a `Failed` run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_wire_names() {
        assert_eq!(serde_json::to_string(&Direction::PushOnly).unwrap(), "\"push_only\"");
        let parsed: Direction = serde_json::from_str("\"pull_only\"").unwrap();
        assert_eq!(parsed, Direction::PullOnly);
        assert!(serde_json::from_str::<Direction>("\"sideways\"").is_err());
    }

    #[test]
    fn direction_phases() {
        assert!(Direction::Both.includes_push() && Direction::Both.includes_pull());
        assert!(Direction::PushOnly.includes_push() && !Direction::PushOnly.includes_pull());
        assert!(!Direction::PullOnly.includes_push() && Direction::PullOnly.includes_pull());
    }

    #[test]
    fn run_options_defaults() {
        let options: RunOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.direction, Direction::Both);
        assert!(!options.dry_run);

        let options: RunOptions =
            serde_json::from_str(r#"{"direction": "push_only", "dryRun": true}"#).unwrap();
        assert_eq!(options.direction, Direction::PushOnly);
        assert!(options.dry_run);
    }

    #[test]
    fn issue_serialization_omits_empty_ids() {
        let issue = SyncIssue::new(Phase::Push, IssueKind::AccountNotFound, "no account")
            .member("kid-1");
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"kind\":\"account_not_found\""));
        assert!(json.contains("\"memberId\":\"kid-1\""));
        assert!(!json.contains("ledgerTxId"));
    }

    #[test]
    fn planned_change_is_tagged() {
        let change = PlannedChange::Pull {
            member_id: "kid-1".into(),
            ledger_tx_id: "tx-1".into(),
            points: 20,
            amount: 200,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"type\":\"pull\""));
        assert!(json.contains("\"ledgerTxId\":\"tx-1\""));
    }

    #[test]
    fn run_state_from_status() {
        assert_eq!(RunState::from(RunStatus::Failed), RunState::Failed);
        assert_eq!(
            RunState::from(RunStatus::CompletedWithErrors),
            RunState::CompletedWithErrors
        );
    }
}
