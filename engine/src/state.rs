//! Persisted sync state.
//!
//! [`SyncState`] is the only durable artifact owned by the engine. It is read
//! once at the start of a run and written once at the end. All maps are
//! `BTreeMap`s so the JSON form is deterministic and diffs cleanly.

use crate::{
    error::Result, idempotency, Error, IdempotencyId, LedgerTxId, MemberId, MinorUnits, Points,
    Timestamp,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the state file format.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// A ledger transaction created by the push phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedEntry {
    pub member_id: MemberId,
    pub ledger_tx_id: LedgerTxId,
    /// Point delta that was pushed
    pub points: Points,
    /// Amount written to the ledger, in minor units
    pub amount: MinorUnits,
    /// When the write was confirmed (milliseconds since epoch)
    pub timestamp: Timestamp,
}

/// A ledger transaction consumed by the pull phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledEntry {
    pub member_id: MemberId,
    /// Point adjustment that was applied (zero for sub-point amounts)
    pub points: Points,
    /// Ledger amount, in minor units
    pub amount: MinorUnits,
    /// Calendar date of the ledger transaction; feeds the scan watermark
    pub date: NaiveDate,
    /// When the adjustment was confirmed (milliseconds since epoch)
    pub timestamp: Timestamp,
}

/// A ledger transaction the pull phase has not been able to apply yet.
///
/// Pending entries hold the member's scan watermark back, so a rejected or
/// failed transaction keeps being listed (and reported) until it is pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub member_id: MemberId,
    /// Calendar date of the ledger transaction
    pub date: NaiveDate,
}

/// Counts exposed by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub pushed_count: usize,
    pub pulled_count: usize,
    pub tracked_members: usize,
    pub pending_count: usize,
    pub last_run: Option<Timestamp>,
}

/// The reconciliation journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// State format version
    pub format_version: u32,
    /// Push-created ledger transactions by idempotency id
    #[serde(default)]
    pub pushed: BTreeMap<IdempotencyId, PushedEntry>,
    /// Pulled ledger transactions by ledger transaction id
    #[serde(default)]
    pub pulled: BTreeMap<LedgerTxId, PulledEntry>,
    /// Ledger transactions that failed to pull, by ledger transaction id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<LedgerTxId, PendingEntry>,
    /// Point balance snapshot each member was last synced at
    #[serde(default)]
    pub last_synced_points: BTreeMap<MemberId, Points>,
    /// End of the last run that persisted state
    #[serde(default)]
    pub last_run_timestamp: Option<Timestamp>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// Create an empty state, as used on the very first run.
    pub fn new() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            pushed: BTreeMap::new(),
            pulled: BTreeMap::new(),
            pending: BTreeMap::new(),
            last_synced_points: BTreeMap::new(),
            last_run_timestamp: None,
        }
    }

    pub fn has_pushed(&self, idempotency_id: &str) -> bool {
        self.pushed.contains_key(idempotency_id)
    }

    pub fn has_pulled(&self, ledger_tx_id: &str) -> bool {
        self.pulled.contains_key(ledger_tx_id)
    }

    /// Balance snapshot for a member, if the member has been seen before.
    pub fn last_synced(&self, member_id: &str) -> Option<Points> {
        self.last_synced_points.get(member_id).copied()
    }

    /// Record a confirmed push and advance the member's snapshot to `balance`.
    pub fn record_push(
        &mut self,
        idempotency_id: IdempotencyId,
        entry: PushedEntry,
        balance: Points,
    ) {
        self.last_synced_points.insert(entry.member_id.clone(), balance);
        self.pushed.insert(idempotency_id, entry);
    }

    /// Record a consumed ledger transaction and shift the member's snapshot by
    /// the applied points, so the next push does not echo the adjustment back.
    ///
    /// `baseline` is used when the member has no snapshot yet.
    pub fn record_pull(&mut self, ledger_tx_id: LedgerTxId, entry: PulledEntry, baseline: Points) {
        let snapshot = self
            .last_synced_points
            .entry(entry.member_id.clone())
            .or_insert(baseline);
        *snapshot += entry.points;
        self.pending.remove(&ledger_tx_id);
        self.pulled.insert(ledger_tx_id, entry);
    }

    /// Remember a ledger transaction that could not be pulled this run.
    pub fn record_pending(&mut self, ledger_tx_id: LedgerTxId, entry: PendingEntry) {
        self.pending.insert(ledger_tx_id, entry);
    }

    /// Drop a member's pending entries for which `still_listed` is false,
    /// i.e. transactions that disappeared from the ledger.
    pub fn retain_pending<F>(&mut self, member_id: &str, still_listed: F)
    where
        F: Fn(&str) -> bool,
    {
        self.pending
            .retain(|tx_id, entry| entry.member_id != member_id || still_listed(tx_id));
    }

    /// Record the first observed balance of a member.
    pub fn record_baseline(&mut self, member_id: &str, balance: Points) {
        self.last_synced_points
            .entry(member_id.to_string())
            .or_insert(balance);
    }

    /// First ledger date the next scan of a member must include: the latest
    /// pulled date, held back to the oldest pending transaction.
    pub fn pull_watermark(&self, member_id: &str) -> Option<NaiveDate> {
        let latest_pulled = self
            .pulled
            .values()
            .filter(|entry| entry.member_id == member_id)
            .map(|entry| entry.date)
            .max();
        let oldest_pending = self
            .pending
            .values()
            .filter(|entry| entry.member_id == member_id)
            .map(|entry| entry.date)
            .min();

        match (latest_pulled, oldest_pending) {
            (Some(pulled), Some(pending)) => Some(pulled.min(pending)),
            (pulled, pending) => pulled.or(pending),
        }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            pushed_count: self.pushed.len(),
            pulled_count: self.pulled.len(),
            tracked_members: self.last_synced_points.len(),
            pending_count: self.pending.len(),
            last_run: self.last_run_timestamp,
        }
    }

    /// Check internal consistency of a loaded state.
    ///
    /// Every `pushed` key must be a well-formed push id naming the same member
    /// as its entry, and no ledger transaction may be both pushed and pulled.
    pub fn validate(&self) -> Result<()> {
        for (id, entry) in &self.pushed {
            match idempotency::parse_push_id(id) {
                Some((member_id, _)) if member_id == entry.member_id => {}
                Some((member_id, _)) => {
                    return Err(Error::InvalidState(format!(
                        "pushed entry {id} belongs to {member_id}, recorded for {}",
                        entry.member_id
                    )))
                }
                None => {
                    return Err(Error::InvalidState(format!(
                        "pushed entry has malformed idempotency id {id:?}"
                    )))
                }
            }
        }

        let pushed_tx_ids: std::collections::BTreeSet<&str> = self
            .pushed
            .values()
            .map(|entry| entry.ledger_tx_id.as_str())
            .collect();
        if let Some(tx_id) = self
            .pulled
            .keys()
            .find(|tx_id| pushed_tx_ids.contains(tx_id.as_str()))
        {
            return Err(Error::InvalidState(format!(
                "ledger transaction {tx_id} is recorded as both pushed and pulled"
            )));
        }
        if let Some(tx_id) = self.pending.keys().find(|tx_id| self.has_pulled(tx_id)) {
            return Err(Error::InvalidState(format!(
                "ledger transaction {tx_id} is recorded as both pulled and pending"
            )));
        }

        Ok(())
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidState(e.to_string()))
    }

    /// Deserialize and validate. Never falls back to an empty state.
    pub fn from_json(json: &str) -> Result<Self> {
        let state: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidState(e.to_string()))?;

        if state.format_version == 0 || state.format_version > STATE_FORMAT_VERSION {
            return Err(Error::InvalidState(format!(
                "unsupported state format version: {} (max supported: {})",
                state.format_version, STATE_FORMAT_VERSION
            )));
        }

        state.validate()?;
        Ok(state)
    }
}
