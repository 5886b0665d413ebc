//! Idempotency identifiers for ledger transactions created by the engine.
//!
//! Every transaction the push phase creates carries an id of the form
//! `push:{member_id}:{YYYY-MM-DD}`. The id is a pure function of member and
//! calendar day, so replaying the push phase on the same day produces the same
//! id, and the reserved `push:` prefix lets the pull phase recognise the
//! engine's own writes without consulting any state.

use crate::{IdempotencyId, MemberId};
use chrono::NaiveDate;

/// Reserved namespace for ids generated by the push phase.
pub const PUSH_PREFIX: &str = "push:";

/// Deterministic id for the push of `member_id` on `date`.
pub fn push_id(member_id: &str, date: NaiveDate) -> IdempotencyId {
    format!("{PUSH_PREFIX}{member_id}:{}", date.format("%Y-%m-%d"))
}

/// Whether a ledger transaction was created by the push phase.
///
/// Transactions without an id were entered by hand and are never ours.
pub fn is_engine_origin(idempotency_id: Option<&str>) -> bool {
    idempotency_id.is_some_and(|id| id.starts_with(PUSH_PREFIX))
}

/// Split a push id back into member and date. Returns `None` for foreign ids.
pub fn parse_push_id(idempotency_id: &str) -> Option<(MemberId, NaiveDate)> {
    let rest = idempotency_id.strip_prefix(PUSH_PREFIX)?;
    let (member_id, date) = rest.rsplit_once(':')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((member_id.to_string(), date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()
    }

    #[test]
    fn push_id_is_deterministic() {
        assert_eq!(push_id("kid-1", day()), "push:kid-1:2024-10-15");
        assert_eq!(push_id("kid-1", day()), push_id("kid-1", day()));
        assert_ne!(push_id("kid-1", day()), push_id("kid-2", day()));
        assert_ne!(
            push_id("kid-1", day()),
            push_id("kid-1", day().succ_opt().unwrap())
        );
    }

    #[test]
    fn origin_detection() {
        assert!(is_engine_origin(Some("push:kid-1:2024-10-15")));
        assert!(!is_engine_origin(Some("bank-import-8812")));
        assert!(!is_engine_origin(Some("")));
        assert!(!is_engine_origin(None));
        // prefix match is case sensitive
        assert!(!is_engine_origin(Some("PUSH:kid-1:2024-10-15")));
    }

    #[test]
    fn parse_round_trip() {
        let id = push_id("member:with:colons", day());
        assert_eq!(
            parse_push_id(&id),
            Some(("member:with:colons".to_string(), day()))
        );
        assert_eq!(parse_push_id("manual-1"), None);
        assert_eq!(parse_push_id("push:kid-1:not-a-date"), None);
    }
}
