//! Structured results returned by engine operations.
//!
//! Plain records (ids, decimals, timestamps, enums) so the API collaborator
//! can serialize them without knowing engine internals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entities::{Contribution, DepositStatus, Member};
use super::value_objects::{GroupId, MemberId};

// =============================================================================
// ROTATION
// =============================================================================

/// The member whose turn it is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientInfo {
    pub member_id: MemberId,
    pub rotation_position: u32,
    /// 0-based index, equal to the group's `current_rotation_position`
    pub position_in_cycle: u32,
}

/// Read-only view of whether the rotation could move on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancementCheck {
    pub can_advance: bool,
    pub current_recipient: Option<RecipientInfo>,
    pub confirmed_count: usize,
    pub expected_count: usize,
    pub pending_count: usize,
    pub reason: Option<String>,
}

impl AdvancementCheck {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            can_advance: false,
            current_recipient: None,
            confirmed_count: 0,
            expected_count: 0,
            pending_count: 0,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a successful advancement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    pub group_id: GroupId,
    pub previous_position: u32,
    pub new_position: u32,
    pub next_recipient: RecipientInfo,
    pub completed_rotations: u64,
    /// The advancement wrapped back to the first position
    pub wrapped_to_start: bool,
    /// `total_rotations_completed` reached the rotation size
    pub is_cycle_complete: bool,
    /// Members released by the cycle-completion unlock, if it ran
    pub unlocked_members: Vec<MemberId>,
    /// Suspended members who left the rotation on this step
    pub departed_members: Vec<MemberId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Current,
    Completed,
    Upcoming,
}

/// One slot of the rotation schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub index: u32,
    pub member_id: MemberId,
    pub rotation_position: u32,
    pub is_current: bool,
    pub is_completed: bool,
    pub status: ScheduleStatus,
}

// =============================================================================
// CONFIRMATION
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub transaction: Contribution,
    /// This call moved the record into `both_confirmed`
    pub completed_now: bool,
    /// An advancement check was enqueued for the group
    pub advancement_check_enqueued: bool,
}

// =============================================================================
// DEPOSITS
// =============================================================================

/// How a deposit figure was derived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositBreakdown {
    pub contribution_amount: Decimal,
    pub multiplier: Decimal,
    pub position: u32,
    pub total_members: u32,
    pub remaining_members_after_position: u32,
    pub max_potential_loss: Decimal,
    pub deposit_amount: Decimal,
}

/// Per-member line of a sufficiency analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCoverage {
    pub member_id: MemberId,
    pub position: u32,
    pub deposit_amount: Decimal,
    pub required_deposit: Decimal,
    pub max_potential_loss: Decimal,
    pub coverage_gap: Decimal,
}

impl MemberCoverage {
    pub fn is_sufficient(&self) -> bool {
        self.coverage_gap.is_zero()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SufficiencyReport {
    pub is_sufficient: bool,
    pub total_coverage: Decimal,
    pub potential_shortfall: Decimal,
    pub members: Vec<MemberCoverage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub member: Member,
    pub deposit: DepositBreakdown,
}

// =============================================================================
// LOCK-IN
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInOutcome {
    pub member_id: MemberId,
    pub payout_amount: Decimal,
    pub locked_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    SecurityLockin,
    SecurityDeposit,
    DepositReplenishment,
    ContinuedParticipation,
}

/// A single restriction or obligation on a member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub kind: RestrictionKind,
    pub description: String,
    pub amount: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatus {
    pub group_id: GroupId,
    pub total_members: usize,
    pub completed_rotations: u64,
    pub remaining_rotations: u64,
    pub is_cycle_complete: bool,
    pub locked_member_ids: Vec<MemberId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatus {
    pub deposit_status: DepositStatus,
    pub is_locked_in: bool,
    pub has_received_payout: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureEligibility {
    pub member_id: MemberId,
    pub eligible: bool,
    pub restrictions: Vec<Restriction>,
    pub cycle_status: CycleStatus,
    pub security_status: SecurityStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRestrictions {
    pub member_id: MemberId,
    pub restrictions: Vec<Restriction>,
    pub obligations: Vec<Restriction>,
    pub can_leave: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockOutcome {
    pub group_id: GroupId,
    pub unlocked_member_ids: Vec<MemberId>,
}

// =============================================================================
// DEFAULTS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutDecision {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub should_default: bool,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefaultOutcome {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub cover: Contribution,
    pub remaining_deposit: Decimal,
    pub new_current_position: u32,
    /// Already paid out: keeps the slot and covers the rest of the pass
    pub suspended: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentOutcome {
    pub member: Member,
    pub amount: Decimal,
    pub required_deposit: Decimal,
    /// Deposit is back in good standing
    pub restored: bool,
}

// =============================================================================
// AUDIT
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateRotationPosition,
    RotationPositionGap,
    CurrentPositionOutOfRange,
    MemberLimitExceeded,
    InsufficientDeposit,
    ConfirmedZeroDeposit,
    MissingConfirmationTimestamp,
    PaidOutMemberNotLockedIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
}
