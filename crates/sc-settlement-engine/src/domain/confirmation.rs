//! # Contribution Confirmation Protocol
//!
//! Dual-party state machine for a single transfer record.
//!
//! ```text
//!                  ┌─ sender ───→ SenderConfirmed ────┐
//!  Pending ────────┤                                  ├─ other side ─→ BothConfirmed
//!                  └─ recipient → RecipientConfirmed ─┘
//! ```
//!
//! Transitions only move forward. Each side is confirmed exactly once by the
//! party named on the record; a repeated confirmation of the same side is
//! rejected and never overwrites the original timestamp.

use chrono::{DateTime, Utc};

use super::entities::{ConfirmationStatus, Contribution};
use super::errors::{EngineError, EngineResult};
use super::value_objects::{ConfirmationSide, MemberId};

/// Party that must confirm `side` of `tx`.
pub fn party_for(tx: &Contribution, side: ConfirmationSide) -> MemberId {
    match side {
        ConfirmationSide::Sender => tx.from_member,
        ConfirmationSide::Recipient => tx.to_member,
    }
}

/// Timestamp already recorded for `side`, if any.
pub fn confirmed_at(tx: &Contribution, side: ConfirmationSide) -> Option<DateTime<Utc>> {
    match side {
        ConfirmationSide::Sender => tx.sender_confirmed_at,
        ConfirmationSide::Recipient => tx.recipient_confirmed_at,
    }
}

/// Apply one side's confirmation to `tx`, returning the updated record.
///
/// Authorization is checked before the duplicate check so a stranger never
/// learns which sides are already confirmed.
///
/// # Errors
///
/// - `Authorization` if `member` is not the party for `side`
/// - `DuplicateConfirmation` if `side` already carries a timestamp
pub fn apply_confirmation(
    tx: &Contribution,
    side: ConfirmationSide,
    member: MemberId,
    at: DateTime<Utc>,
) -> EngineResult<Contribution> {
    if party_for(tx, side) != member {
        return Err(EngineError::Authorization {
            transaction_id: tx.id,
            member_id: member,
            side,
        });
    }
    if confirmed_at(tx, side).is_some() {
        return Err(EngineError::DuplicateConfirmation {
            transaction_id: tx.id,
            side,
        });
    }

    let mut next = tx.clone();
    match side {
        ConfirmationSide::Sender => next.sender_confirmed_at = Some(at),
        ConfirmationSide::Recipient => next.recipient_confirmed_at = Some(at),
    }
    next.confirmation_status = ConfirmationStatus::from_sides(
        next.sender_confirmed_at.is_some(),
        next.recipient_confirmed_at.is_some(),
    );
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TransactionType;
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::{GroupId, TransactionId};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn pending_tx() -> Contribution {
        Contribution {
            id: TransactionId::new(),
            group_id: GroupId::new(),
            from_member: MemberId::new(),
            to_member: MemberId::new(),
            amount: dec!(1000),
            transaction_type: TransactionType::Contribution,
            confirmation_status: ConfirmationStatus::Pending,
            sender_confirmed_at: None,
            recipient_confirmed_at: None,
            cycle: 0,
            note: None,
            created_at: t0(),
        }
    }

    #[test]
    fn test_sender_then_recipient() {
        let tx = pending_tx();
        let a = apply_confirmation(&tx, ConfirmationSide::Sender, tx.from_member, t0()).unwrap();
        assert_eq!(a.confirmation_status, ConfirmationStatus::SenderConfirmed);

        let later = t0() + Duration::seconds(5);
        let b = apply_confirmation(&a, ConfirmationSide::Recipient, tx.to_member, later).unwrap();
        assert_eq!(b.confirmation_status, ConfirmationStatus::BothConfirmed);
        assert_eq!(b.sender_confirmed_at, Some(t0()));
        assert_eq!(b.recipient_confirmed_at, Some(later));
    }

    #[test]
    fn test_recipient_then_sender() {
        let tx = pending_tx();
        let a = apply_confirmation(&tx, ConfirmationSide::Recipient, tx.to_member, t0()).unwrap();
        assert_eq!(a.confirmation_status, ConfirmationStatus::RecipientConfirmed);
        let b = apply_confirmation(&a, ConfirmationSide::Sender, tx.from_member, t0()).unwrap();
        assert!(b.is_both_confirmed());
    }

    #[test]
    fn test_duplicate_side_rejected_before_and_after_other_side() {
        let tx = pending_tx();
        let a = apply_confirmation(&tx, ConfirmationSide::Sender, tx.from_member, t0()).unwrap();

        let err = apply_confirmation(&a, ConfirmationSide::Sender, tx.from_member, t0()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateConfirmation);

        let b = apply_confirmation(&a, ConfirmationSide::Recipient, tx.to_member, t0()).unwrap();
        let err = apply_confirmation(&b, ConfirmationSide::Sender, tx.from_member, t0()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateConfirmation);
        let err = apply_confirmation(&b, ConfirmationSide::Recipient, tx.to_member, t0()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateConfirmation);
    }

    #[test]
    fn test_wrong_party_rejected() {
        let tx = pending_tx();
        let stranger = MemberId::new();
        let err = apply_confirmation(&tx, ConfirmationSide::Sender, stranger, t0()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        // recipient cannot confirm the sender side
        let err = apply_confirmation(&tx, ConfirmationSide::Sender, tx.to_member, t0()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_original_record_untouched() {
        let tx = pending_tx();
        let _ = apply_confirmation(&tx, ConfirmationSide::Sender, tx.from_member, t0()).unwrap();
        assert_eq!(tx.confirmation_status, ConfirmationStatus::Pending);
        assert!(tx.sender_confirmed_at.is_none());
    }
}
