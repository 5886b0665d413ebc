//! Time budget for external calls within one run.

use crate::ExternalError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Why a budgeted call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallError {
    /// The external system failed or the call hit its own timeout
    External(ExternalError),
    /// The run deadline passed; no call was issued
    DeadlineExceeded,
}

/// Per-call timeout bounded by a whole-run deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallBudget {
    deadline: Instant,
    call_timeout: Duration,
}

impl CallBudget {
    pub(crate) fn new(run_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + run_timeout,
            call_timeout,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Run `call` with a timeout of `min(call_timeout, time left)`.
    pub(crate) async fn call<T, F>(&self, call: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, ExternalError>>,
    {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CallError::DeadlineExceeded);
        }

        match tokio::time::timeout(remaining.min(self.call_timeout), call).await {
            Ok(result) => result.map_err(CallError::External),
            Err(_) => Err(CallError::External(ExternalError::Timeout)),
        }
    }
}
