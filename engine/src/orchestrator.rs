//! Coordination of one reconciliation run.
//!
//! # Algorithm
//!
//! 1. Preflight: ping the ledger and list the family's members. Either
//!    failing is a configuration-level failure and the run ends `Failed`
//!    with the input state untouched. Tracked members that are no longer
//!    listed are reported here.
//! 2. Push phase, if selected.
//! 3. Pull phase, if selected. Push always runs first so a member's own
//!    delta for the day is written before anything is read back.
//! 4. Merge the issues of both phases into one report.
//!
//! Every external call runs under a per-call timeout bounded by the run
//! deadline. When the deadline passes the phases stop issuing calls and the
//! state confirmed so far is returned for persistence.

use crate::accounts::AccountCache;
use crate::budget::{CallBudget, CallError};
use crate::report::{
    IssueKind, Phase, PlannedChange, RunOptions, RunStatus, SyncIssue, SyncReport,
};
use crate::{error::Result, pull, push};
use crate::{Ledger, Member, MemberDirectory, SyncConfig, SyncState, Timestamp};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Inputs of a run that come from the caller rather than configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    pub options: RunOptions,
    /// Calendar day used for push ids and transaction dates
    pub today: NaiveDate,
    /// Start of the run (milliseconds since epoch)
    pub now: Timestamp,
}

/// Report plus the state to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub report: SyncReport,
    /// Updated state; equal to the input for dry runs and failed runs
    pub state: SyncState,
}

impl RunOutcome {
    /// Whether the caller should write `state` back to storage.
    pub fn should_persist(&self) -> bool {
        !self.report.dry_run && self.report.status != RunStatus::Failed
    }
}

/// Shared, read-only view of a run handed to both phases.
pub(crate) struct RunContext<'a> {
    pub(crate) members: &'a dyn MemberDirectory,
    pub(crate) ledger: &'a dyn Ledger,
    pub(crate) config: &'a SyncConfig,
    pub(crate) budget: CallBudget,
    pub(crate) run_id: &'a str,
    pub(crate) today: NaiveDate,
    pub(crate) now: Timestamp,
    pub(crate) dry_run: bool,
}

/// Runs reconciliation between a [`MemberDirectory`] and a [`Ledger`].
#[derive(Clone)]
pub struct Orchestrator {
    members: Arc<dyn MemberDirectory>,
    ledger: Arc<dyn Ledger>,
    config: SyncConfig,
}

impl Orchestrator {
    /// Create an orchestrator. Fails fast on invalid configuration.
    pub fn new(
        members: Arc<dyn MemberDirectory>,
        ledger: Arc<dyn Ledger>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            members,
            ledger,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn members(&self) -> &Arc<dyn MemberDirectory> {
        &self.members
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Execute one run against `state`.
    pub async fn run(&self, state: SyncState, request: RunRequest) -> RunOutcome {
        let started = Instant::now();
        let RunOptions { direction, dry_run } = request.options;
        info!(run_id = %request.run_id, ?direction, dry_run, "reconciliation run started");

        let budget = CallBudget::new(self.config.run_timeout, self.config.call_timeout);
        let mut report = SyncReport {
            run_id: request.run_id.clone(),
            status: RunStatus::Completed,
            direction,
            dry_run,
            started_at: request.now,
            finished_at: request.now,
            pushed: 0,
            pulled: 0,
            skipped: 0,
            errors: Vec::new(),
            planned: Vec::new(),
            failure: None,
        };

        let members = match self.preflight(&budget).await {
            Ok(members) => members,
            Err(failure) => {
                error!(run_id = %request.run_id, "reconciliation run failed: {failure}");
                report.status = RunStatus::Failed;
                report.failure = Some(failure);
                report.finished_at = finished_at(request.now, started);
                return RunOutcome { report, state };
            }
        };

        let ctx = RunContext {
            members: self.members.as_ref(),
            ledger: self.ledger.as_ref(),
            config: &self.config,
            budget,
            run_id: &request.run_id,
            today: request.today,
            now: request.now,
            dry_run,
        };
        let mut working = state.clone();
        let mut accounts = AccountCache::default();
        let mut planned: Vec<PlannedChange> = Vec::new();
        let mut interrupted: Option<Phase> = None;

        report.errors.extend(missing_members(&members, &state));

        if direction.includes_push() {
            let outcome = push::run(&ctx, &mut accounts, &members, &mut working).await;
            report.pushed += outcome.created + outcome.recovered;
            report.skipped += outcome.skipped;
            report.errors.extend(outcome.issues);
            planned.extend(outcome.planned);
            if outcome.interrupted {
                interrupted = Some(Phase::Push);
            }
        }

        if direction.includes_pull() && interrupted.is_none() {
            let outcome = pull::run(&ctx, &mut accounts, &members, &mut working).await;
            report.pulled += outcome.applied;
            report.skipped += outcome.skipped_own + outcome.skipped_seen + outcome.below_one_point;
            report.errors.extend(outcome.issues);
            planned.extend(outcome.planned);
            if outcome.interrupted {
                interrupted = Some(Phase::Pull);
            }
        }

        if let Some(phase) = interrupted {
            warn!(run_id = %request.run_id, ?phase, "run deadline reached, stopping early");
            report.errors.push(SyncIssue::new(
                phase,
                IssueKind::DeadlineExceeded,
                format!(
                    "run exceeded {}s; remaining items were not processed",
                    self.config.run_timeout.as_secs()
                ),
            ));
        }

        report.planned = planned;
        report.status = if report.errors.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };
        report.finished_at = finished_at(request.now, started);

        info!(
            run_id = %request.run_id,
            status = ?report.status,
            pushed = report.pushed,
            pulled = report.pulled,
            skipped = report.skipped,
            errors = report.errors.len(),
            "reconciliation run finished"
        );

        let state = if dry_run {
            state
        } else {
            working.last_run_timestamp = Some(report.finished_at);
            working
        };
        RunOutcome { report, state }
    }

    async fn preflight(&self, budget: &CallBudget) -> std::result::Result<Vec<Member>, String> {
        budget
            .call(self.ledger.ping())
            .await
            .map_err(|e| format!("ledger unreachable: {}", describe(e)))?;

        budget
            .call(self.members.list_members(&self.config.family_id))
            .await
            .map_err(|e| format!("member system unreachable: {}", describe(e)))
    }
}

fn describe(err: CallError) -> String {
    match err {
        CallError::External(e) => e.to_string(),
        CallError::DeadlineExceeded => "run deadline exceeded".to_string(),
    }
}

fn finished_at(now: Timestamp, started: Instant) -> Timestamp {
    now + started.elapsed().as_millis() as Timestamp
}

/// Members with a snapshot that the member system no longer lists. Their
/// snapshot is kept until someone decides what deletion should mean.
fn missing_members(members: &[Member], state: &SyncState) -> Vec<SyncIssue> {
    state
        .last_synced_points
        .keys()
        .filter(|id| !members.iter().any(|m| &m.id == *id))
        .map(|id| {
            SyncIssue::new(
                Phase::Preflight,
                IssueKind::MemberMissing,
                "member has sync state but is not listed by the member system",
            )
            .member(id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSystems;
    use crate::{ConversionRate, Currency, Direction};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()
    }

    fn orchestrator(systems: &FakeSystems) -> Orchestrator {
        let config = SyncConfig::new(
            "fam-1",
            ConversionRate::from_decimal("0.10", 2).unwrap(),
            Currency::new("USD", 2).unwrap(),
        );
        Orchestrator::new(
            Arc::new(systems.member_directory()),
            Arc::new(systems.ledger()),
            config,
        )
        .unwrap()
    }

    fn request(direction: Direction, dry_run: bool) -> RunRequest {
        RunRequest {
            run_id: "run-1".into(),
            options: RunOptions { direction, dry_run },
            today: today(),
            now: 1_729_000_000_000,
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let systems = FakeSystems::new();
        let config = SyncConfig::new(
            "",
            ConversionRate::new(10, 1).unwrap(),
            Currency::new("USD", 2).unwrap(),
        );
        let result = Orchestrator::new(
            Arc::new(systems.member_directory()),
            Arc::new(systems.ledger()),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_without_touching_state() {
        let systems = FakeSystems::new();
        systems.add_member_with_account("kid-1", "Ada", 150, "Points: Ada");
        systems.set_ledger_down(true);

        let mut state = SyncState::new();
        state.record_baseline("kid-1", 135);

        let outcome = orchestrator(&systems)
            .run(state.clone(), request(Direction::Both, false))
            .await;

        assert_eq!(outcome.report.status, RunStatus::Failed);
        assert!(outcome.report.failure.as_deref().unwrap().contains("ledger"));
        assert_eq!(outcome.state, state);
        assert!(!outcome.should_persist());
        assert_eq!(systems.writes(), 0);
    }

    #[tokio::test]
    async fn unreachable_member_system_fails() {
        let systems = FakeSystems::new();
        systems.set_members_down(true);

        let outcome = orchestrator(&systems)
            .run(SyncState::new(), request(Direction::Both, false))
            .await;

        assert_eq!(outcome.report.status, RunStatus::Failed);
        assert!(outcome.report.failure.as_deref().unwrap().contains("member system"));
    }

    #[tokio::test]
    async fn empty_family_completes() {
        let systems = FakeSystems::new();
        let outcome = orchestrator(&systems)
            .run(SyncState::new(), request(Direction::Both, false))
            .await;

        assert_eq!(outcome.report.status, RunStatus::Completed);
        assert_eq!(outcome.report.pushed, 0);
        assert_eq!(outcome.report.pulled, 0);
        assert!(outcome.should_persist());
        assert_eq!(outcome.state.last_run_timestamp, Some(outcome.report.finished_at));
    }

    #[tokio::test]
    async fn missing_member_is_reported_and_kept() {
        let systems = FakeSystems::new();
        let mut state = SyncState::new();
        state.record_baseline("kid-gone", 40);

        let outcome = orchestrator(&systems)
            .run(state, request(Direction::PullOnly, false))
            .await;

        assert_eq!(outcome.report.status, RunStatus::CompletedWithErrors);
        let issue = &outcome.report.errors[0];
        assert_eq!(issue.kind, IssueKind::MemberMissing);
        assert_eq!(issue.phase, Phase::Preflight);
        assert_eq!(issue.member_id.as_deref(), Some("kid-gone"));
        assert_eq!(outcome.state.last_synced("kid-gone"), Some(40));
    }

    #[tokio::test]
    async fn push_only_never_reads_for_pull() {
        let systems = FakeSystems::new();
        let account = systems.add_member_with_account("kid-1", "Ada", 150, "Points: Ada");
        systems.add_manual_transaction(&account, 200, today(), None);

        let mut state = SyncState::new();
        state.record_baseline("kid-1", 135);

        let outcome = orchestrator(&systems)
            .run(state, request(Direction::PushOnly, false))
            .await;

        assert_eq!(outcome.report.pushed, 1);
        assert_eq!(outcome.report.pulled, 0);
        assert!(systems.adjustments().is_empty());
    }

    #[tokio::test]
    async fn dry_run_returns_input_state() {
        let systems = FakeSystems::new();
        systems.add_member_with_account("kid-1", "Ada", 150, "Points: Ada");
        systems.add_member_with_account("kid-2", "Bo", 10, "Points: Bo");

        let mut state = SyncState::new();
        state.record_baseline("kid-1", 135);

        let outcome = orchestrator(&systems)
            .run(state.clone(), request(Direction::Both, true))
            .await;

        assert!(outcome.report.dry_run);
        assert_eq!(outcome.state, state);
        assert!(!outcome.should_persist());
        assert_eq!(outcome.report.planned.len(), 1);
        assert_eq!(systems.writes(), 0);
    }
}
