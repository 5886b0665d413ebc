//! In-memory member system and ledger for testing.
//!
//! Both fakes share one state so a test can inspect the whole world after a
//! run: balances, ledger rows and every call the engine made.

use crate::external::{
    ExternalError, Ledger, LedgerAccount, LedgerTransaction, Member, MemberDirectory,
    NewLedgerTransaction,
};
use crate::{AccountId, MemberId, MinorUnits, Points};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Recorded call to a fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    // Member system calls
    PingMembers,
    ListMembers {
        family_id: String,
    },
    AdjustPoints {
        member_id: MemberId,
        delta: Points,
        reason: String,
    },

    // Ledger calls
    PingLedger,
    FindAccount {
        name: String,
    },
    ListTransactions {
        account_id: AccountId,
        since: NaiveDate,
    },
    CreateTransaction {
        account_id: AccountId,
        transaction: NewLedgerTransaction,
    },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<FakeCall>,
    members: Vec<Member>,
    accounts: Vec<LedgerAccount>,
    transactions: Vec<LedgerTransaction>,
    next_tx: u64,
    // Configurable failure modes
    members_down: bool,
    ledger_down: bool,
    fail_adjust: HashSet<MemberId>,
    fail_create: HashSet<AccountId>,
    /// Creates that are stored but answered with a timeout
    lose_create_response: HashSet<AccountId>,
    ledger_dedupes: bool,
    delay: Option<Duration>,
}

/// Shared handle over a fake member system and a fake ledger.
#[derive(Clone, Default)]
pub struct FakeSystems {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSystems {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The member system view
    pub fn member_directory(&self) -> FakeMemberDirectory {
        FakeMemberDirectory {
            systems: self.clone(),
        }
    }

    /// The ledger view
    pub fn ledger(&self) -> FakeLedger {
        FakeLedger {
            systems: self.clone(),
        }
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Add a member together with a ledger account called `account_name`.
    pub fn add_member_with_account(
        &self,
        id: &str,
        display_name: &str,
        points: Points,
        account_name: &str,
    ) -> AccountId {
        self.add_member(id, display_name, points);
        let account_id = format!("acct-{id}");
        self.add_account(&account_id, account_name);
        account_id
    }

    pub fn add_member(&self, id: &str, display_name: &str, points: Points) {
        self.lock().members.push(Member::new(id, display_name, points));
    }

    pub fn remove_member(&self, id: &str) {
        self.lock().members.retain(|m| m.id != id);
    }

    /// Change a balance the way a parent would in the member app.
    pub fn set_points(&self, id: &str, points: Points) {
        if let Some(member) = self.lock().members.iter_mut().find(|m| m.id == id) {
            member.points = points;
        }
    }

    pub fn points(&self, id: &str) -> Option<Points> {
        self.lock().members.iter().find(|m| m.id == id).map(|m| m.points)
    }

    pub fn add_account(&self, id: &str, name: &str) {
        self.lock().accounts.push(LedgerAccount {
            id: id.into(),
            name: name.into(),
        });
    }

    /// Add a hand-entered transaction; returns its id.
    pub fn add_manual_transaction(
        &self,
        account_id: &str,
        amount: MinorUnits,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state);
        state.transactions.push(LedgerTransaction {
            id: id.clone(),
            account_id: account_id.into(),
            amount,
            date,
            notes: notes.map(Into::into),
            idempotency_id: None,
        });
        id
    }

    pub fn transactions(&self, account_id: &str) -> Vec<LedgerTransaction> {
        self.lock()
            .transactions
            .iter()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Sum of all transactions on an account.
    pub fn balance(&self, account_id: &str) -> MinorUnits {
        self.transactions(account_id).iter().map(|tx| tx.amount).sum()
    }

    /// Number of `create_transaction` calls, failed ones included.
    pub fn creates(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, FakeCall::CreateTransaction { .. }))
            .count()
    }

    /// Every `adjust_points` call as `(member, delta)`.
    pub fn adjustments(&self) -> Vec<(MemberId, Points)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                FakeCall::AdjustPoints {
                    member_id, delta, ..
                } => Some((member_id.clone(), *delta)),
                _ => None,
            })
            .collect()
    }

    /// Number of calls that would write to either system.
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    FakeCall::CreateTransaction { .. } | FakeCall::AdjustPoints { .. }
                )
            })
            .count()
    }

    pub fn set_members_down(&self, down: bool) {
        self.lock().members_down = down;
    }

    pub fn set_ledger_down(&self, down: bool) {
        self.lock().ledger_down = down;
    }

    /// Reject every `adjust_points` for this member.
    pub fn fail_adjust_for(&self, member_id: &str) {
        self.lock().fail_adjust.insert(member_id.into());
    }

    /// Reject every `create_transaction` on this account.
    pub fn fail_create_for(&self, account_id: &str) {
        self.lock().fail_create.insert(account_id.into());
    }

    /// Store creates on this account but answer with a timeout, as if the
    /// connection dropped after the ledger committed.
    pub fn lose_create_response_for(&self, account_id: &str) {
        self.lock().lose_create_response.insert(account_id.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.members_down = false;
        state.ledger_down = false;
        state.fail_adjust.clear();
        state.fail_create.clear();
        state.lose_create_response.clear();
    }

    /// Return the existing row when a create repeats an idempotency id.
    pub fn set_ledger_dedupes(&self, dedupes: bool) {
        self.lock().ledger_dedupes = dedupes;
    }

    /// Delay every call by `delay` (tokio time, so paused clocks work).
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    async fn enter(&self, call: FakeCall) {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn next_id(state: &mut FakeState) -> String {
    state.next_tx += 1;
    format!("tx-{}", state.next_tx)
}

fn unavailable(system: &str) -> ExternalError {
    ExternalError::Unavailable(format!("{system} is down"))
}

/// Fake member system
#[derive(Clone)]
pub struct FakeMemberDirectory {
    systems: FakeSystems,
}

#[async_trait]
impl MemberDirectory for FakeMemberDirectory {
    async fn ping(&self) -> Result<(), ExternalError> {
        self.systems.enter(FakeCall::PingMembers).await;
        if self.systems.lock().members_down {
            return Err(unavailable("member system"));
        }
        Ok(())
    }

    async fn list_members(&self, family_id: &str) -> Result<Vec<Member>, ExternalError> {
        self.systems
            .enter(FakeCall::ListMembers {
                family_id: family_id.into(),
            })
            .await;
        let state = self.systems.lock();
        if state.members_down {
            return Err(unavailable("member system"));
        }
        Ok(state.members.clone())
    }

    async fn adjust_points(
        &self,
        member_id: &str,
        delta: Points,
        reason: &str,
    ) -> Result<(), ExternalError> {
        self.systems
            .enter(FakeCall::AdjustPoints {
                member_id: member_id.into(),
                delta,
                reason: reason.into(),
            })
            .await;
        let mut state = self.systems.lock();
        if state.members_down {
            return Err(unavailable("member system"));
        }
        if state.fail_adjust.contains(member_id) {
            return Err(ExternalError::Rejected {
                status: 422,
                message: "adjustment rejected".into(),
            });
        }
        let member = state
            .members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or_else(|| ExternalError::NotFound(format!("member {member_id}")))?;
        member.points += delta;
        Ok(())
    }
}

/// Fake ledger
#[derive(Clone)]
pub struct FakeLedger {
    systems: FakeSystems,
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn ping(&self) -> Result<(), ExternalError> {
        self.systems.enter(FakeCall::PingLedger).await;
        if self.systems.lock().ledger_down {
            return Err(unavailable("ledger"));
        }
        Ok(())
    }

    async fn find_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LedgerAccount>, ExternalError> {
        self.systems
            .enter(FakeCall::FindAccount { name: name.into() })
            .await;
        let state = self.systems.lock();
        if state.ledger_down {
            return Err(unavailable("ledger"));
        }
        Ok(state.accounts.iter().find(|a| a.name == name).cloned())
    }

    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<LedgerTransaction>, ExternalError> {
        self.systems
            .enter(FakeCall::ListTransactions {
                account_id: account_id.into(),
                since,
            })
            .await;
        let state = self.systems.lock();
        if state.ledger_down {
            return Err(unavailable("ledger"));
        }
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.account_id == account_id && tx.date >= since)
            .cloned()
            .collect())
    }

    async fn create_transaction(
        &self,
        account_id: &str,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, ExternalError> {
        self.systems
            .enter(FakeCall::CreateTransaction {
                account_id: account_id.into(),
                transaction: transaction.clone(),
            })
            .await;
        let mut state = self.systems.lock();
        if state.ledger_down {
            return Err(unavailable("ledger"));
        }
        if state.fail_create.contains(account_id) {
            return Err(ExternalError::Rejected {
                status: 400,
                message: "transaction rejected".into(),
            });
        }
        if state.ledger_dedupes {
            let existing = state.transactions.iter().find(|tx| {
                tx.account_id == account_id
                    && tx.idempotency_id.as_deref() == Some(transaction.idempotency_id.as_str())
            });
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }

        let id = next_id(&mut state);
        let created = LedgerTransaction {
            id,
            account_id: account_id.into(),
            amount: transaction.amount,
            date: transaction.date,
            notes: Some(transaction.notes),
            idempotency_id: Some(transaction.idempotency_id),
        };
        state.transactions.push(created.clone());
        if state.lose_create_response.contains(account_id) {
            return Err(ExternalError::Timeout);
        }
        Ok(created)
    }
}
