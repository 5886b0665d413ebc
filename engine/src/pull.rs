//! Pull phase: ledger transactions -> member point adjustments.
//!
//! The phase scans each member's ledger account from a per-account watermark,
//! drops everything the push phase wrote itself, and turns the remaining
//! transactions into point adjustments. A transaction that cannot be applied
//! is kept pending, which holds the watermark at its date.

use crate::accounts::{AccountCache, ItemError};
use crate::conversion::amount_to_points;
use crate::date::earliest_packed_date;
use crate::idempotency;
use crate::orchestrator::RunContext;
use crate::report::{IssueKind, Phase, PlannedChange, SyncIssue};
use crate::state::{PendingEntry, PulledEntry, SyncState};
use crate::{error::Result, ConversionRate, LedgerTransaction, Member, Points};
use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

/// What the pull phase does with one ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// Carries the push prefix; the engine wrote it
    OwnWrite,
    AlreadyPulled,
    /// Amount rounds to zero points; record it without adjusting
    BelowOnePoint,
    /// Converted points exceed the adjustment limit
    ExceedsLimit(Points),
    Apply(Points),
}

/// Classify a ledger transaction. The prefix check comes first and does not
/// depend on state, so the engine's own writes are ignored even if the state
/// file was lost.
pub fn classify(
    tx: &LedgerTransaction,
    state: &SyncState,
    rate: &ConversionRate,
    adjustment_limit: Points,
) -> Result<PullDecision> {
    if idempotency::is_engine_origin(tx.idempotency_id.as_deref()) {
        return Ok(PullDecision::OwnWrite);
    }
    if state.has_pulled(&tx.id) {
        return Ok(PullDecision::AlreadyPulled);
    }

    let points = amount_to_points(tx.amount, rate)?;
    Ok(match points {
        0 => PullDecision::BelowOnePoint,
        p if p.abs() > adjustment_limit => PullDecision::ExceedsLimit(p),
        p => PullDecision::Apply(p),
    })
}

/// First date to scan for a member: the latest pulled date (or the oldest
/// pending one, if earlier), or the lookback window for accounts that were
/// never pulled.
pub fn watermark(
    state: &SyncState,
    member_id: &str,
    today: NaiveDate,
    lookback_days: u32,
) -> NaiveDate {
    state.pull_watermark(member_id).unwrap_or_else(|| {
        today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN)
            .max(earliest_packed_date())
    })
}

/// Counts and issues produced by one pull phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOutcome {
    /// Point adjustments applied
    pub applied: usize,
    /// Engine-created transactions reflected back
    pub skipped_own: usize,
    /// Transactions pulled in an earlier run
    pub skipped_seen: usize,
    /// Sub-point amounts recorded without an adjustment
    pub below_one_point: usize,
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
) -> PullOutcome {
    let mut outcome = PullOutcome::default();

    for member in members {
        if ctx.budget.expired() {
            outcome.interrupted = true;
            break;
        }

        match pull_member(ctx, accounts, member, state, &mut outcome).await {
            Ok(()) => {}
            Err(ItemError::Issue(issue)) => {
                warn!(
                    run_id = %ctx.run_id,
                    member_id = %member.id,
                    kind = ?issue.kind,
                    "pull failed: {}",
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

async fn pull_member(
    ctx: &RunContext<'_>,
    accounts: &mut AccountCache,
    member: &Member,
    state: &mut SyncState,
    outcome: &mut PullOutcome,
) -> std::result::Result<(), ItemError> {
    let account = accounts
        .resolve(ctx.ledger, ctx.config, &ctx.budget, member, Phase::Pull)
        .await?;

    let since = watermark(state, &member.id, ctx.today, ctx.config.lookback_days);
    let mut transactions = ctx
        .budget
        .call(ctx.ledger.list_transactions(&account.id, since))
        .await
        .map_err(|e| {
            ItemError::from_call(
                e,
                Phase::Pull,
                IssueKind::ListFailed,
                &member.id,
                "list transactions",
            )
        })?;
    transactions.sort_by(|a, b| (a.date, &a.id).cmp(&(b.date, &b.id)));
    debug!(member_id = %member.id, %since, count = transactions.len(), "scanned ledger account");
    if !ctx.dry_run {
        state.retain_pending(&member.id, |tx_id| {
            transactions.iter().any(|tx| tx.id == tx_id)
        });
    }

    for tx in &transactions {
        if ctx.budget.expired() {
            return Err(ItemError::DeadlineExceeded);
        }
        match pull_transaction(ctx, member, tx, state, outcome).await {
            Ok(()) => {}
            Err(ItemError::Issue(issue)) => {
                warn!(
                    run_id = %ctx.run_id,
                    member_id = %member.id,
                    ledger_tx_id = %tx.id,
                    kind = ?issue.kind,
                    "pull failed: {}",
                    issue.message
                );
                if !ctx.dry_run {
                    let entry = PendingEntry {
                        member_id: member.id.clone(),
                        date: tx.date,
                    };
                    state.record_pending(tx.id.clone(), entry);
                }
                outcome.issues.push(issue);
            }
            Err(ItemError::DeadlineExceeded) => return Err(ItemError::DeadlineExceeded),
        }
    }

    Ok(())
}

async fn pull_transaction(
    ctx: &RunContext<'_>,
    member: &Member,
    tx: &LedgerTransaction,
    state: &mut SyncState,
    outcome: &mut PullOutcome,
) -> std::result::Result<(), ItemError> {
    let issue = |kind: IssueKind, message: String| {
        ItemError::Issue(
            SyncIssue::new(Phase::Pull, kind, message)
                .member(&member.id)
                .transaction(&tx.id),
        )
    };

    let decision = classify(tx, state, &ctx.config.rate, ctx.config.adjustment_limit)
        .map_err(|e| issue(IssueKind::Conversion, e.to_string()))?;

    let points = match decision {
        PullDecision::OwnWrite => {
            outcome.skipped_own += 1;
            return Ok(());
        }
        PullDecision::AlreadyPulled => {
            outcome.skipped_seen += 1;
            return Ok(());
        }
        PullDecision::ExceedsLimit(points) => {
            return Err(issue(
                IssueKind::AdjustmentExceedsLimit,
                format!(
                    "{} converts to {points} points, limit is {}",
                    ctx.config.currency.format(tx.amount),
                    ctx.config.adjustment_limit
                ),
            ));
        }
        PullDecision::BelowOnePoint => {
            debug!(ledger_tx_id = %tx.id, amount = tx.amount, "amount below one point");
            outcome.below_one_point += 1;
            if !ctx.dry_run {
                let entry = pulled_entry(ctx, member, tx, 0);
                state.record_pull(tx.id.clone(), entry, member.points);
            }
            return Ok(());
        }
        PullDecision::Apply(points) => points,
    };

    if ctx.dry_run {
        outcome.planned.push(PlannedChange::Pull {
            member_id: member.id.clone(),
            ledger_tx_id: tx.id.clone(),
            points,
            amount: tx.amount,
        });
        return Ok(());
    }

    let reason = format!(
        "Ledger sync: {} ({})",
        tx.notes.as_deref().filter(|n| !n.is_empty()).unwrap_or("manual entry"),
        ctx.config.currency.format(tx.amount)
    );
    ctx.budget
        .call(ctx.members.adjust_points(&member.id, points, &reason))
        .await
        .map_err(|e| {
            match ItemError::from_call(
                e,
                Phase::Pull,
                IssueKind::AdjustFailed,
                &member.id,
                "adjust points",
            ) {
                ItemError::Issue(issue) => ItemError::Issue(issue.transaction(&tx.id)),
                other => other,
            }
        })?;

    info!(
        run_id = %ctx.run_id,
        member_id = %member.id,
        ledger_tx_id = %tx.id,
        points,
        "pulled ledger transaction into points"
    );
    let entry = pulled_entry(ctx, member, tx, points);
    state.record_pull(tx.id.clone(), entry, member.points);
    outcome.applied += 1;
    Ok(())
}

fn pulled_entry(
    ctx: &RunContext<'_>,
    member: &Member,
    tx: &LedgerTransaction,
    points: Points,
) -> PulledEntry {
    PulledEntry {
        member_id: member.id.clone(),
        points,
        amount: tx.amount,
        date: tx.date,
        timestamp: ctx.now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::push_id;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    fn rate() -> ConversionRate {
        ConversionRate::new(10, 1).unwrap()
    }

    fn tx(id: &str, amount: i64, idempotency_id: Option<&str>) -> LedgerTransaction {
        LedgerTransaction {
            id: id.into(),
            account_id: "acct-1".into(),
            amount,
            date: day(15),
            notes: None,
            idempotency_id: idempotency_id.map(Into::into),
        }
    }

    #[test]
    fn own_writes_are_filtered_without_state() {
        let state = SyncState::new();
        let own = tx("tx-1", 150, Some(&push_id("kid-1", day(15))));
        assert_eq!(
            classify(&own, &state, &rate(), 1000).unwrap(),
            PullDecision::OwnWrite
        );
    }

    #[test]
    fn manual_entries_are_applied() {
        let state = SyncState::new();
        assert_eq!(
            classify(&tx("tx-1", 200, None), &state, &rate(), 1000).unwrap(),
            PullDecision::Apply(20)
        );
        assert_eq!(
            classify(&tx("tx-2", -200, Some("bank-77")), &state, &rate(), 1000).unwrap(),
            PullDecision::Apply(-20)
        );
    }

    #[test]
    fn already_pulled_is_skipped() {
        let mut state = SyncState::new();
        state.record_pull(
            "tx-1".into(),
            PulledEntry {
                member_id: "kid-1".into(),
                points: 20,
                amount: 200,
                date: day(15),
                timestamp: 0,
            },
            0,
        );
        assert_eq!(
            classify(&tx("tx-1", 200, None), &state, &rate(), 1000).unwrap(),
            PullDecision::AlreadyPulled
        );
    }

    #[test]
    fn limit_is_reported_not_clamped() {
        let state = SyncState::new();
        // 100.10 at 0.10 per point is 1001 points
        assert_eq!(
            classify(&tx("tx-1", 10_010, None), &state, &rate(), 1000).unwrap(),
            PullDecision::ExceedsLimit(1001)
        );
        assert_eq!(
            classify(&tx("tx-2", -10_010, None), &state, &rate(), 1000).unwrap(),
            PullDecision::ExceedsLimit(-1001)
        );
        assert_eq!(
            classify(&tx("tx-3", 10_000, None), &state, &rate(), 1000).unwrap(),
            PullDecision::Apply(1000)
        );
    }

    #[test]
    fn sub_point_amounts() {
        let state = SyncState::new();
        assert_eq!(
            classify(&tx("tx-1", 4, None), &state, &rate(), 1000).unwrap(),
            PullDecision::BelowOnePoint
        );
    }

    #[test]
    fn watermark_falls_back_to_lookback() {
        let state = SyncState::new();
        assert_eq!(watermark(&state, "kid-1", day(31), 30), day(1));
    }

    #[test]
    fn watermark_waits_for_pending_transaction() {
        let mut state = SyncState::new();
        state.record_pending(
            "tx-1".into(),
            PendingEntry {
                member_id: "kid-1".into(),
                date: day(3),
            },
        );
        assert_eq!(watermark(&state, "kid-1", day(31), 7), day(3));
        assert_eq!(watermark(&state, "kid-2", day(31), 7), day(24));
    }

    #[test]
    fn lookback_stops_at_earliest_packed_date() {
        let state = SyncState::new();
        assert_eq!(
            watermark(&state, "kid-1", day(31), u32::MAX),
            earliest_packed_date()
        );
    }
}
