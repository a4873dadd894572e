//! Core domain entities for the settlement engine.
//!
//! These are the persisted records. They carry no behavior that touches
//! storage; all mutation goes through the application services.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value_objects::{GroupId, LockType, MemberId, TransactionId};

/// Rotation position value for a member who is no longer in the rotation.
pub const OUT_OF_ROTATION: u32 = 0;

// =============================================================================
// GROUP
// =============================================================================

/// How often the rotation moves to the next recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl RotationFrequency {
    /// Length of one rotation period.
    pub fn period(&self) -> Duration {
        match self {
            RotationFrequency::Daily => Duration::hours(24),
            RotationFrequency::Weekly => Duration::hours(168),
            RotationFrequency::Monthly => Duration::hours(720),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Closed,
}

/// A savings group and its rotation cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub contribution_amount: Decimal,
    pub rotation_frequency: RotationFrequency,
    pub member_limit: u32,
    pub security_deposit_multiplier: Decimal,
    /// 0-based index into the active members ordered by rotation position
    pub current_rotation_position: u32,
    pub total_rotations_completed: u64,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(
        contribution_amount: Decimal,
        rotation_frequency: RotationFrequency,
        member_limit: u32,
        security_deposit_multiplier: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GroupId::new(),
            contribution_amount,
            rotation_frequency,
            member_limit,
            security_deposit_multiplier,
            current_rotation_position: 0,
            total_rotations_completed: 0,
            status: GroupStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == GroupStatus::Closed
    }

    /// True once every active member has had the full number of passes.
    pub fn is_cycle_complete(&self, active_members: usize) -> bool {
        active_members > 0 && self.total_rotations_completed >= active_members as u64
    }

    /// Pot the current recipient collects from everyone else.
    pub fn payout_amount(&self, active_members: usize) -> Decimal {
        self.contribution_amount * Decimal::from(active_members.saturating_sub(1) as u64)
    }
}

// =============================================================================
// MEMBER
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Active,
    Left,
    Defaulted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Locked,
    Used,
    Returned,
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Locked => "locked",
            DepositStatus::Used => "used",
            DepositStatus::Returned => "returned",
        };
        f.write_str(s)
    }
}

/// Where a member stood when they defaulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRecord {
    /// `total_rotations_completed` at the time of the default
    pub cycle: u64,
    /// 1-based slot held at the time of the default
    pub position: u32,
    /// Members in the rotation at the time of the default
    pub total_members: u32,
}

/// A member of one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    /// 1-based, dense among active members; `OUT_OF_ROTATION` once removed
    pub rotation_position: u32,
    pub status: MemberStatus,
    pub security_deposit_amount: Decimal,
    pub security_deposit_status: DepositStatus,
    pub is_locked_in: bool,
    pub has_received_payout: bool,
    pub joined_at: DateTime<Utc>,
    /// Set by default handling; cleared once the deposit is replenished
    #[serde(default)]
    pub default_record: Option<DefaultRecord>,
}

impl Member {
    pub fn new(
        id: MemberId,
        group_id: GroupId,
        rotation_position: u32,
        security_deposit_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            rotation_position,
            status: MemberStatus::Active,
            security_deposit_amount,
            security_deposit_status: DepositStatus::Pending,
            is_locked_in: false,
            has_received_payout: false,
            joined_at: now,
            default_record: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Holds a rotation slot: active, or suspended.
    pub fn in_rotation(&self) -> bool {
        self.rotation_position != OUT_OF_ROTATION
            && matches!(self.status, MemberStatus::Active | MemberStatus::Defaulted)
    }

    /// Defaulted after collecting the pot. Keeps the slot so each remaining
    /// share of the pass is covered from the deposit; never a recipient again.
    pub fn is_suspended(&self) -> bool {
        self.status == MemberStatus::Defaulted && self.rotation_position != OUT_OF_ROTATION
    }
}

// =============================================================================
// CONTRIBUTION (TRANSACTION RECORD)
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Contribution,
    Payout,
    Deposit,
    DefaultCover,
}

impl TransactionType {
    /// Whether a confirmed record of this type settles a member's share of
    /// the current recipient's pot.
    pub fn settles_rotation_share(&self) -> bool {
        matches!(
            self,
            TransactionType::Contribution | TransactionType::DefaultCover
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    SenderConfirmed,
    RecipientConfirmed,
    BothConfirmed,
}

impl ConfirmationStatus {
    /// Status implied by which sides have confirmed.
    pub fn from_sides(sender: bool, recipient: bool) -> Self {
        match (sender, recipient) {
            (false, false) => ConfirmationStatus::Pending,
            (true, false) => ConfirmationStatus::SenderConfirmed,
            (false, true) => ConfirmationStatus::RecipientConfirmed,
            (true, true) => ConfirmationStatus::BothConfirmed,
        }
    }
}

/// A funds transfer between two members of a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: TransactionId,
    pub group_id: GroupId,
    pub from_member: MemberId,
    pub to_member: MemberId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub confirmation_status: ConfirmationStatus,
    pub sender_confirmed_at: Option<DateTime<Utc>>,
    pub recipient_confirmed_at: Option<DateTime<Utc>>,
    /// Pass through the rotation this transfer belongs to
    pub cycle: u64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contribution {
    pub fn is_both_confirmed(&self) -> bool {
        self.confirmation_status == ConfirmationStatus::BothConfirmed
    }

    /// Confirmed record settling a share of `recipient`'s pot in `cycle`.
    pub fn settles_share_of(&self, recipient: MemberId, cycle: u64) -> bool {
        self.is_both_confirmed()
            && self.to_member == recipient
            && self.cycle == cycle
            && self.transaction_type.settles_rotation_share()
    }
}

// =============================================================================
// LOCK LEASE
// =============================================================================

/// A time-bounded exclusive grant over `(lock_type, resource_key)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub lock_type: LockType,
    pub resource_key: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: i64,
    /// Epoch millis; compared by the store during conditional writes
    pub expires_at_ms: i64,
}

impl LockLease {
    pub fn new(
        lock_type: LockType,
        resource_key: impl Into<String>,
        holder_id: impl Into<String>,
        acquired_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            lock_type,
            resource_key: resource_key.into(),
            holder_id: holder_id.into(),
            acquired_at,
            ttl_secs: ttl.num_seconds(),
            expires_at_ms: (acquired_at + ttl).timestamp_millis(),
        }
    }

    /// Storage key of the single row a lease occupies.
    pub fn storage_key(lock_type: LockType, resource_key: &str) -> String {
        format!("{}:{}", lock_type.as_str(), resource_key)
    }

    pub fn key(&self) -> String {
        Self::storage_key(self.lock_type, &self.resource_key)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_status_from_sides() {
        assert_eq!(
            ConfirmationStatus::from_sides(false, false),
            ConfirmationStatus::Pending
        );
        assert_eq!(
            ConfirmationStatus::from_sides(true, false),
            ConfirmationStatus::SenderConfirmed
        );
        assert_eq!(
            ConfirmationStatus::from_sides(false, true),
            ConfirmationStatus::RecipientConfirmed
        );
        assert_eq!(
            ConfirmationStatus::from_sides(true, true),
            ConfirmationStatus::BothConfirmed
        );
    }

    #[test]
    fn test_suspended_member_keeps_slot() {
        let mut member = Member::new(MemberId::new(), GroupId::new(), 2, dec!(1000), t0());
        assert!(member.in_rotation() && !member.is_suspended());

        member.status = MemberStatus::Defaulted;
        assert!(member.in_rotation() && member.is_suspended());
        assert!(!member.is_active());

        member.rotation_position = OUT_OF_ROTATION;
        assert!(!member.in_rotation() && !member.is_suspended());

        member.status = MemberStatus::Pending;
        assert!(!member.in_rotation());
    }

    #[test]
    fn test_lease_expiry() {
        let lease = LockLease::new(
            LockType::RotationAdvance,
            "g1",
            "holder",
            t0(),
            Duration::seconds(30),
        );
        assert_eq!(lease.key(), "rotation_advance:g1");
        assert!(!lease.is_expired(t0() + Duration::seconds(29)));
        assert!(lease.is_expired(t0() + Duration::seconds(30)));
    }

    #[test]
    fn test_cycle_complete_needs_members() {
        let mut group = Group::new(dec!(1000), RotationFrequency::Weekly, 4, dec!(1), t0());
        assert!(!group.is_cycle_complete(0));
        group.total_rotations_completed = 4;
        assert!(group.is_cycle_complete(4));
        assert!(!group.is_cycle_complete(5));
    }

    #[test]
    fn test_payout_amount() {
        let group = Group::new(dec!(1000), RotationFrequency::Monthly, 5, dec!(1), t0());
        assert_eq!(group.payout_amount(5), dec!(4000));
        assert_eq!(group.payout_amount(0), dec!(0));
    }

    #[test]
    fn test_frequency_periods() {
        assert_eq!(RotationFrequency::Daily.period(), Duration::hours(24));
        assert_eq!(RotationFrequency::Weekly.period(), Duration::days(7));
        assert_eq!(RotationFrequency::Monthly.period(), Duration::days(30));
    }
}
