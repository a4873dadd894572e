//! # Inbound Port - SettlementApi
//!
//! Driving port exposed to the web/API collaborator and the scheduler.
//! Every method takes and returns plain records (ids, decimals, timestamps,
//! enums); failures carry an [`ErrorKind`](crate::domain::ErrorKind) and map
//! onto a [`Failure`](crate::domain::Failure) for the caller.
//!
//! ## Lease discipline
//!
//! | Method | Lease held |
//! |--------|------------|
//! | `trigger_lock_in`, `unlock_members_after_cycle_completion` | `rotation_advance` |
//! | `start_rotation`, `advance_rotation` | `rotation_advance`, then `member_join` |
//! | `join_group`, `leave_group`, `confirm_security_deposit`, `replenish_deposit` | `member_join` |
//! | `handle_default` | `default_handling`, `rotation_advance`, then `member_join` |
//! | everything else | none (reads, or single-record compare-and-swap) |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AdvanceOutcome, AdvancementCheck, ConfirmationOutcome, ConfirmationSide, ConsistencyIssue,
    Contribution, CycleStatus, DefaultOutcome, DepartureEligibility, EngineResult, Group, GroupId,
    JoinOutcome, LockInOutcome, Member, MemberId, MemberRestrictions, RecipientInfo, RotationFrequency,
    ReplenishmentOutcome, ScheduleEntry, SufficiencyReport, TimeoutDecision, TransactionId,
    TransactionType, UnlockOutcome,
};

/// Request to create a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewGroup {
    pub contribution_amount: Decimal,
    pub rotation_frequency: RotationFrequency,
    pub member_limit: u32,
    pub security_deposit_multiplier: Decimal,
}

/// Request to record a transfer between two members.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub group_id: GroupId,
    pub from_member: MemberId,
    pub to_member: MemberId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub note: Option<String>,
}

/// Primary API of the settlement engine.
#[async_trait]
pub trait SettlementApi: Send + Sync {
    // --- groups and membership ---

    async fn create_group(&self, request: NewGroup) -> EngineResult<Group>;

    async fn get_group(&self, group_id: GroupId) -> EngineResult<Group>;

    /// Every member row of the group, ordered by rotation position.
    async fn list_members(&self, group_id: GroupId) -> EngineResult<Vec<Member>>;

    /// Admit a member and size every active deposit for the new count.
    ///
    /// # Errors
    /// - `BusinessLogic`: group closed, full, or already paying out
    /// - `Validation`: preferred position out of range
    async fn join_group(
        &self,
        group_id: GroupId,
        member_id: Option<MemberId>,
        preferred_position: Option<u32>,
    ) -> EngineResult<JoinOutcome>;

    /// Deposit status `pending -> confirmed`.
    async fn confirm_security_deposit(&self, member_id: MemberId) -> EngineResult<Member>;

    /// Lock in the first recipient and open the rotation. Idempotent.
    async fn start_rotation(&self, group_id: GroupId) -> EngineResult<RecipientInfo>;

    async fn leave_group(&self, member_id: MemberId) -> EngineResult<Member>;

    // --- transactions ---

    async fn create_transaction(&self, request: NewTransaction) -> EngineResult<Contribution>;

    /// Confirm one side of a transfer.
    ///
    /// # Errors
    /// - `Authorization`: `member_id` is not the party for `side`
    /// - `DuplicateConfirmation`: `side` was already confirmed
    async fn confirm_transaction(
        &self,
        transaction_id: TransactionId,
        member_id: MemberId,
        side: ConfirmationSide,
    ) -> EngineResult<ConfirmationOutcome>;

    async fn get_transaction(&self, transaction_id: TransactionId) -> EngineResult<Contribution>;

    /// Transfers on which `member_id` still owes their side's confirmation.
    async fn pending_confirmations(&self, member_id: MemberId) -> EngineResult<Vec<Contribution>>;

    // --- rotation ---

    async fn get_current_rotation(&self, group_id: GroupId) -> EngineResult<RecipientInfo>;

    async fn get_rotation_schedule(&self, group_id: GroupId) -> EngineResult<Vec<ScheduleEntry>>;

    /// Lock-free hint; never a guard for `advance_rotation`.
    async fn validate_rotation_advancement(&self, group_id: GroupId) -> EngineResult<AdvancementCheck>;

    /// Advance by exactly one step.
    ///
    /// # Errors
    /// - `Concurrency`: lease held elsewhere, or the rotation is no longer
    ///   complete because another caller already advanced
    async fn advance_rotation(&self, group_id: GroupId) -> EngineResult<AdvanceOutcome>;

    async fn is_rotation_complete(&self, group_id: GroupId, recipient_id: MemberId) -> EngineResult<bool>;

    // --- deposits and lock-in ---

    async fn analyze_deposit_sufficiency(&self, group_id: GroupId) -> EngineResult<SufficiencyReport>;

    async fn validate_no_loss_guarantee(&self, group_id: GroupId) -> EngineResult<bool>;

    async fn validate_departure_eligibility(&self, member_id: MemberId) -> EngineResult<DepartureEligibility>;

    async fn get_member_restrictions(&self, member_id: MemberId) -> EngineResult<MemberRestrictions>;

    async fn check_cycle_completion(&self, group_id: GroupId) -> EngineResult<CycleStatus>;

    /// Lock in the current recipient ahead of their payout.
    ///
    /// # Errors
    /// - `BusinessLogic`: not the current recipient, deposit not confirmed,
    ///   or already paid out
    async fn trigger_lock_in(&self, member_id: MemberId, payout_amount: Decimal) -> EngineResult<LockInOutcome>;

    /// # Errors
    /// - `BusinessLogic`: the cycle is not complete
    async fn unlock_members_after_cycle_completion(&self, group_id: GroupId) -> EngineResult<UnlockOutcome>;

    // --- defaults ---

    /// Read-only decision for the scheduler.
    async fn check_contribution_timeout(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        deadline: DateTime<Utc>,
    ) -> EngineResult<TimeoutDecision>;

    async fn handle_default(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        reason: &str,
    ) -> EngineResult<DefaultOutcome>;

    /// Top up a deposit spent on default covers.
    ///
    /// # Errors
    /// - `Validation`: non-positive amount
    /// - `BusinessLogic`: the deposit is not `used`, or the group is closed
    async fn replenish_deposit(&self, member_id: MemberId, amount: Decimal) -> EngineResult<ReplenishmentOutcome>;

    // --- audit ---

    async fn audit_group(&self, group_id: GroupId) -> EngineResult<Vec<ConsistencyIssue>>;
}
