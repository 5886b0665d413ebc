//! Member -> ledger account resolution, shared by both phases of a run.

use crate::budget::{CallBudget, CallError};
use crate::report::{IssueKind, Phase, SyncIssue};
use crate::{ExternalError, Ledger, LedgerAccount, Member, MemberId, SyncConfig};
use std::collections::HashMap;

/// Why processing of one member (or one transaction) stopped.
#[derive(Debug)]
pub(crate) enum ItemError {
    Issue(SyncIssue),
    /// The run deadline passed; the phase must stop issuing calls
    DeadlineExceeded,
}

impl ItemError {
    /// Map a failed external call onto a member-scoped issue.
    pub(crate) fn from_call(
        err: CallError,
        phase: Phase,
        kind: IssueKind,
        member_id: &str,
        action: &str,
    ) -> Self {
        match err {
            CallError::DeadlineExceeded => ItemError::DeadlineExceeded,
            CallError::External(ExternalError::Timeout) => ItemError::Issue(
                SyncIssue::new(phase, IssueKind::Timeout, format!("{action} timed out"))
                    .member(member_id),
            ),
            CallError::External(e) => ItemError::Issue(
                SyncIssue::new(phase, kind, format!("{action} failed: {e}")).member(member_id),
            ),
        }
    }
}

/// Accounts found so far in this run. Misses are not cached, so a transient
/// lookup failure in the push phase is retried by the pull phase.
#[derive(Debug, Default)]
pub(crate) struct AccountCache {
    resolved: HashMap<MemberId, LedgerAccount>,
}

impl AccountCache {
    pub(crate) async fn resolve(
        &mut self,
        ledger: &dyn Ledger,
        config: &SyncConfig,
        budget: &CallBudget,
        member: &Member,
        phase: Phase,
    ) -> Result<LedgerAccount, ItemError> {
        if let Some(account) = self.resolved.get(&member.id) {
            return Ok(account.clone());
        }

        let name = config.account_name(&member.display_name);
        let found = budget
            .call(ledger.find_account_by_name(&name))
            .await
            .map_err(|e| {
                ItemError::from_call(
                    e,
                    phase,
                    IssueKind::AccountLookupFailed,
                    &member.id,
                    "account lookup",
                )
            })?;

        match found {
            Some(account) => {
                self.resolved.insert(member.id.clone(), account.clone());
                Ok(account)
            }
            None => Err(ItemError::Issue(
                SyncIssue::new(
                    phase,
                    IssueKind::AccountNotFound,
                    format!("no ledger account named {name:?}"),
                )
                .member(&member.id),
            )),
        }
    }
}
