//! Periodic reconciliation runs.

use crate::trigger::{SyncService, TriggerError};
use ledgerbridge_engine::{RunOptions, RunStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// What one scheduled tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(RunStatus),
    /// A manual run held the guard
    Skipped,
    Aborted,
}

/// Spawn the scheduler. The first run happens one `interval` after startup.
pub fn spawn(service: Arc<SyncService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tick(&service).await;
        }
    })
}

/// Run one scheduled reconciliation in both directions.
pub async fn tick(service: &SyncService) -> TickOutcome {
    match service.trigger(RunOptions::default()).await {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                status = ?report.status,
                "Scheduled sync finished"
            );
            TickOutcome::Ran(report.status)
        }
        Err(TriggerError::AlreadyRunning) => {
            tracing::info!("Scheduled sync skipped, a run is already in progress");
            TickOutcome::Skipped
        }
        Err(e) => {
            tracing::error!("Scheduled sync aborted: {}", e);
            TickOutcome::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateFile;
    use crate::trigger::tests::service;
    use ledgerbridge_engine::fake::{FakeCall, FakeSystems};

    #[tokio::test(start_paused = true)]
    async fn tick_skips_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let systems = FakeSystems::new();
        systems.add_member_with_account("kid-1", "Ada", 150, "Points: Ada");
        systems.set_delay(Some(Duration::from_secs(1)));
        let service = Arc::new(service(&systems, StateFile::new(dir.path().join("s.json"))));

        let manual = tokio::spawn({
            let service = service.clone();
            async move { service.trigger(RunOptions::default()).await }
        });
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(tick(&service).await, TickOutcome::Skipped);
        assert!(manual.await.unwrap().is_ok());
        assert_eq!(tick(&service).await, TickOutcome::Ran(RunStatus::Completed));
    }

    #[tokio::test]
    async fn tick_reports_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{").unwrap();
        let systems = FakeSystems::new();
        let service = service(&systems, StateFile::new(&path));

        assert_eq!(tick(&service).await, TickOutcome::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_scheduler_runs_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let systems = FakeSystems::new();
        let service = Arc::new(service(&systems, StateFile::new(dir.path().join("s.json"))));

        let handle = spawn(service, Duration::from_secs(60));
        time::sleep(Duration::from_secs(30)).await;
        assert!(systems.calls().is_empty());

        time::sleep(Duration::from_secs(31)).await;
        // The state file is read on the blocking pool, which paused time does not wait for
        for _ in 0..100 {
            if !systems.calls().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            tokio::task::yield_now().await;
        }
        assert!(systems.calls().contains(&FakeCall::PingLedger));
        handle.abort();
    }
}
