//! Single-flight trigger surface over the orchestrator.
//!
//! Manual triggers and the scheduler both go through [`SyncService`]. At most
//! one run executes at a time; a trigger that arrives while a run is in
//! progress is rejected, not queued.

use crate::store::{StateFile, StateFileError};
use chrono::Utc;
use ledgerbridge_engine::{
    ExternalError, Orchestrator, RunOptions, RunRequest, RunState, SyncReport, Timestamp,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Why a trigger did not produce a report.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("sync already running")]
    AlreadyRunning,

    #[error(transparent)]
    State(#[from] StateFileError),
}

/// Read-only view of the service for `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: RunState,
    pub running: bool,
    /// End of the last run that persisted state
    pub last_run: Option<Timestamp>,
    pub pushed_count: usize,
    pub pulled_count: usize,
    /// Ledger transactions still waiting to be pulled
    pub pending_count: usize,
    pub tracked_members: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<SyncReport>,
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn pass() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub status: HealthStatus,
    pub checks: BTreeMap<&'static str, CheckResult>,
}

#[derive(Default)]
struct Tracking {
    state: RunState,
    last_report: Option<SyncReport>,
}

/// Runs reconciliation on demand, one run at a time.
pub struct SyncService {
    orchestrator: Orchestrator,
    store: StateFile,
    run_guard: Mutex<()>,
    tracking: RwLock<Tracking>,
}

impl SyncService {
    pub fn new(orchestrator: Orchestrator, store: StateFile) -> Self {
        Self {
            orchestrator,
            store,
            run_guard: Mutex::new(()),
            tracking: RwLock::new(Tracking::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    /// Run one reconciliation unless another run holds the guard.
    pub async fn trigger(&self, options: RunOptions) -> Result<SyncReport, TriggerError> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| TriggerError::AlreadyRunning)?;
        self.tracking.write().await.state = RunState::Running;

        let result = self.execute(options).await;

        let mut tracking = self.tracking.write().await;
        match &result {
            Ok(report) => {
                tracking.state = report.status.into();
                tracking.last_report = Some(report.clone());
            }
            Err(e) => {
                tracing::error!("Sync run aborted: {}", e);
                tracking.state = RunState::Failed;
            }
        }
        result
    }

    async fn execute(&self, options: RunOptions) -> Result<SyncReport, TriggerError> {
        let state = self.store.load().await?;

        let now = Utc::now();
        let request = RunRequest {
            run_id: uuid::Uuid::new_v4().to_string(),
            options,
            today: now.date_naive(),
            now: u64::try_from(now.timestamp_millis()).unwrap_or_default(),
        };
        let outcome = self.orchestrator.run(state, request).await;

        if outcome.should_persist() {
            self.store.save(&outcome.state).await.map_err(|e| {
                tracing::error!(
                    run_id = %outcome.report.run_id,
                    "Failed to persist sync state after run: {}",
                    e
                );
                e
            })?;
        }
        Ok(outcome.report)
    }

    /// Current state of the service and the persisted sync state.
    pub async fn status(&self) -> Result<StatusReport, TriggerError> {
        let summary = self.store.load().await?.summary();
        let tracking = self.tracking.read().await;
        Ok(StatusReport {
            state: tracking.state,
            running: self.is_running(),
            last_run: summary.last_run,
            pushed_count: summary.pushed_count,
            pulled_count: summary.pulled_count,
            pending_count: summary.pending_count,
            tracked_members: summary.tracked_members,
            last_report: tracking.last_report.clone(),
        })
    }

    /// Probe the state file, both external APIs and the configuration.
    pub async fn health(&self) -> HealthReport {
        let timeout = self.orchestrator.config().call_timeout;
        let (state_file, member_api, ledger_api) = tokio::join!(
            async {
                match self.store.load().await {
                    Ok(_) => CheckResult::pass(),
                    Err(e) => CheckResult::fail(e.to_string()),
                }
            },
            probe(timeout, self.orchestrator.members().ping()),
            probe(timeout, self.orchestrator.ledger().ping()),
        );
        let config = match self.orchestrator.config().validate() {
            Ok(()) => CheckResult::pass(),
            Err(e) => CheckResult::fail(e.to_string()),
        };

        let checks = BTreeMap::from([
            ("config", config),
            ("ledgerApi", ledger_api),
            ("memberApi", member_api),
            ("stateFile", state_file),
        ]);
        let ok = checks.values().all(|check| check.ok);
        HealthReport {
            ok,
            status: if ok {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            checks,
        }
    }
}

async fn probe<F>(timeout: Duration, ping: F) -> CheckResult
where
    F: Future<Output = Result<(), ExternalError>>,
{
    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(())) => CheckResult::pass(),
        Ok(Err(e)) => CheckResult::fail(e.to_string()),
        Err(_) => CheckResult::fail("timed out"),
    }
}
