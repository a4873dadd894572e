//! # Engine Events
//!
//! Published through [`EventPublisher`](crate::ports::EventPublisher) once the
//! mutation that produced them has committed. Notification and payment
//! collaborators act on these; the advancement worker consumes
//! `AdvancementCheckRequested`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{ConfirmationSide, ConfirmationStatus, GroupId, MemberId, TransactionId, TransactionType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    TransactionCreated {
        group_id: GroupId,
        transaction_id: TransactionId,
        from_member: MemberId,
        to_member: MemberId,
        amount: Decimal,
        transaction_type: TransactionType,
    },

    TransactionConfirmed {
        group_id: GroupId,
        transaction_id: TransactionId,
        side: ConfirmationSide,
        status: ConfirmationStatus,
    },

    /// A transfer reached `both_confirmed`; the group may be ready to advance.
    AdvancementCheckRequested {
        group_id: GroupId,
        recipient_id: MemberId,
    },

    RotationAdvanced {
        group_id: GroupId,
        previous_position: u32,
        new_position: u32,
        next_recipient: MemberId,
        completed_rotations: u64,
    },

    /// The new recipient is owed the pot.
    PayoutDue {
        group_id: GroupId,
        member_id: MemberId,
        amount: Decimal,
    },

    MemberLockedIn {
        group_id: GroupId,
        member_id: MemberId,
        locked_at: DateTime<Utc>,
    },

    MembersUnlocked {
        group_id: GroupId,
        member_ids: Vec<MemberId>,
    },

    /// Collateral should be handed back.
    DepositReturnDue {
        group_id: GroupId,
        member_id: MemberId,
        amount: Decimal,
    },

    MemberDefaulted {
        group_id: GroupId,
        member_id: MemberId,
        covered_amount: Decimal,
        reason: String,
    },

    DepositReplenished {
        group_id: GroupId,
        member_id: MemberId,
        amount: Decimal,
        new_deposit: Decimal,
        restored: bool,
    },
}

impl EngineEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            EngineEvent::TransactionCreated { group_id, .. }
            | EngineEvent::TransactionConfirmed { group_id, .. }
            | EngineEvent::AdvancementCheckRequested { group_id, .. }
            | EngineEvent::RotationAdvanced { group_id, .. }
            | EngineEvent::PayoutDue { group_id, .. }
            | EngineEvent::MemberLockedIn { group_id, .. }
            | EngineEvent::MembersUnlocked { group_id, .. }
            | EngineEvent::DepositReturnDue { group_id, .. }
            | EngineEvent::MemberDefaulted { group_id, .. }
            | EngineEvent::DepositReplenished { group_id, .. } => *group_id,
        }
    }

    /// Event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::TransactionCreated { .. } => "transaction_created",
            EngineEvent::TransactionConfirmed { .. } => "transaction_confirmed",
            EngineEvent::AdvancementCheckRequested { .. } => "advancement_check_requested",
            EngineEvent::RotationAdvanced { .. } => "rotation_advanced",
            EngineEvent::PayoutDue { .. } => "payout_due",
            EngineEvent::MemberLockedIn { .. } => "member_locked_in",
            EngineEvent::MembersUnlocked { .. } => "members_unlocked",
            EngineEvent::DepositReturnDue { .. } => "deposit_return_due",
            EngineEvent::MemberDefaulted { .. } => "member_defaulted",
            EngineEvent::DepositReplenished { .. } => "deposit_replenished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = EngineEvent::AdvancementCheckRequested {
            group_id: GroupId::new(),
            recipient_id: MemberId::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "advancement_check_requested");
        assert_eq!(event.name(), "advancement_check_requested");
    }
}
