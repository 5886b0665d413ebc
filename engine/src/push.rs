//! Push phase: member point balances -> ledger transactions.
//!
//! For every member the phase diffs the current balance against the snapshot
//! taken at the last successful push and writes the difference to the
//! member's ledger account as one transaction per member per day.
//!
//! The snapshot only moves after the ledger confirmed the write. A failed or
//! timed out create leaves it where it was, so the same delta is retried on
//! the next run.

use crate::accounts::{AccountCache, ItemError};
use crate::conversion::{amount_to_points, points_to_amount};
use crate::idempotency::push_id;
use crate::orchestrator::RunContext;
use crate::report::{IssueKind, Phase, PlannedChange, SyncIssue};
use crate::state::{PushedEntry, SyncState};
use crate::{Member, NewLedgerTransaction, Points};
use tracing::{debug, info, warn};

/// Difference between a member's balance and their last synced snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    /// No snapshot yet; the current balance becomes the baseline
    FirstSeen,
    Unchanged,
    /// Signed point change since the snapshot
    Changed(Points),
}

/// Diff a member against the state. A member never seen before is a zero
/// delta, not a windfall.
pub fn compute_delta(member: &Member, state: &SyncState) -> Delta {
    match state.last_synced(&member.id) {
        None => Delta::FirstSeen,
        Some(synced) if synced == member.points => Delta::Unchanged,
        Some(synced) => Delta::Changed(member.points - synced),
    }
}

/// Counts and issues produced by one push phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Ledger transactions created
    pub created: usize,
    /// Transactions found in the ledger but missing from state, adopted
    pub recovered: usize,
    /// Deltas already pushed today
    pub skipped: usize,
    pub issues: Vec<SyncIssue>,
    pub planned: Vec<PlannedChange>,
    /// Stopped early because the run deadline passed
    pub interrupted: bool,
}

pub(crate) async fn run(
    ctx: &RunContext<'_>,
    accounts: &mut AccountCache,
    members: &[Member],
    state: &mut SyncState,
) -> PushOutcome {
    let mut outcome = PushOutcome::default();

    for member in members {
        if ctx.budget.expired() {
            outcome.interrupted = true;
            break;
        }

        match push_member(ctx, accounts, member, state, &mut outcome).await {
            Ok(()) => {}
            Err(ItemError::Issue(issue)) => {
                warn!(
                    run_id = %ctx.run_id,
                    member_id = %member.id,
                    kind = ?issue.kind,
                    "push failed: {}",
                    issue.message
                );
                outcome.issues.push(issue);
            }
            Err(ItemError::DeadlineExceeded) => {
                outcome.interrupted = true;
                break;
            }
        }
    }

    outcome
}

async fn push_member(
    ctx: &RunContext<'_>,
    accounts: &mut AccountCache,
    member: &Member,
    state: &mut SyncState,
    outcome: &mut PushOutcome,
) -> Result<(), ItemError> {
    let delta = match compute_delta(member, state) {
        Delta::FirstSeen => {
            debug!(member_id = %member.id, points = member.points, "recording baseline");
            if !ctx.dry_run {
                state.record_baseline(&member.id, member.points);
            }
            return Ok(());
        }
        Delta::Unchanged => return Ok(()),
        Delta::Changed(delta) => delta,
    };
    let synced = member.points - delta;

    let account = accounts
        .resolve(ctx.ledger, ctx.config, &ctx.budget, member, Phase::Push)
        .await?;

    let amount = points_to_amount(delta, &ctx.config.rate).map_err(|e| {
        ItemError::Issue(
            SyncIssue::new(Phase::Push, IssueKind::Conversion, e.to_string()).member(&member.id),
        )
    })?;

    let idempotency_id = push_id(&member.id, ctx.today);
    if state.has_pushed(&idempotency_id) {
        debug!(member_id = %member.id, %idempotency_id, "already pushed today");
        outcome.skipped += 1;
        return Ok(());
    }

    if ctx.dry_run {
        outcome.planned.push(PlannedChange::Push {
            member_id: member.id.clone(),
            idempotency_id,
            points: delta,
            amount,
        });
        return Ok(());
    }

    // A previous run may have crashed after the ledger accepted the write but
    // before state was saved. Adopt that transaction instead of writing twice.
    let existing = ctx
        .budget
        .call(ctx.ledger.list_transactions(&account.id, ctx.today))
        .await
        .map_err(|e| {
            ItemError::from_call(
                e,
                Phase::Push,
                IssueKind::ListFailed,
                &member.id,
                "list transactions",
            )
        })?;
    if let Some(found) = existing
        .into_iter()
        .find(|tx| tx.idempotency_id.as_deref() == Some(idempotency_id.as_str()))
    {
        let adopted_points = amount_to_points(found.amount, &ctx.config.rate).unwrap_or(delta);
        info!(
            member_id = %member.id,
            ledger_tx_id = %found.id,
            "adopting existing ledger transaction"
        );
        state.record_push(
            idempotency_id,
            PushedEntry {
                member_id: member.id.clone(),
                ledger_tx_id: found.id,
                points: adopted_points,
                amount: found.amount,
                timestamp: ctx.now,
            },
            synced + adopted_points,
        );
        outcome.recovered += 1;
        return Ok(());
    }

    let request = NewLedgerTransaction {
        amount,
        date: ctx.today,
        notes: format!(
            "Points sync: {delta:+} pts ({})",
            ctx.config.currency.format(amount)
        ),
        idempotency_id: idempotency_id.clone(),
    };
    let created = ctx
        .budget
        .call(ctx.ledger.create_transaction(&account.id, request))
        .await
        .map_err(|e| {
            ItemError::from_call(
                e,
                Phase::Push,
                IssueKind::CreateFailed,
                &member.id,
                "create transaction",
            )
        })?;

    info!(
        run_id = %ctx.run_id,
        member_id = %member.id,
        ledger_tx_id = %created.id,
        points = delta,
        amount,
        "pushed points to ledger"
    );
    state.record_push(
        idempotency_id,
        PushedEntry {
            member_id: member.id.clone(),
            ledger_tx_id: created.id,
            points: delta,
            amount,
            timestamp: ctx.now,
        },
        member.points,
    );
    outcome.created += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_member_is_not_a_windfall() {
        let state = SyncState::new();
        let member = Member::new("kid-1", "Ada", 500);
        assert_eq!(compute_delta(&member, &state), Delta::FirstSeen);
    }

    #[test]
    fn delta_sign_follows_balance() {
        let mut state = SyncState::new();
        state.record_baseline("kid-1", 135);

        assert_eq!(
            compute_delta(&Member::new("kid-1", "Ada", 150), &state),
            Delta::Changed(15)
        );
        assert_eq!(
            compute_delta(&Member::new("kid-1", "Ada", 100), &state),
            Delta::Changed(-35)
        );
        assert_eq!(
            compute_delta(&Member::new("kid-1", "Ada", 135), &state),
            Delta::Unchanged
        );
    }
}
