//! # Settlement Engine
//!
//! Facade wiring the services over one shared [`EngineContext`] and
//! implementing the [`SettlementApi`] driving port.
//!
//! ```text
//!                    ┌──────────────────────────┐
//!   SettlementApi ──→│    SettlementEngine      │
//!                    │                          │
//!                    │  MembershipService       │
//!                    │  ConfirmationService ────┼──→ AdvancementCheckRequested
//!                    │  RotationService         │          │
//!                    │  LockInService           │          ▼
//!                    │  DefaultHandler          │   AdvancementWorker
//!                    └────────────┬─────────────┘
//!                                 │ RecordStore, LockManager
//!                                 ▼
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::{
    ConfirmationService, DefaultHandler, EngineContext, LockInService, LockManager,
    MembershipService, RotationService,
};
use crate::config::EngineConfig;
use crate::domain::{
    AdvanceOutcome, AdvancementCheck, ConfirmationOutcome, ConfirmationSide, ConsistencyIssue,
    Contribution, CycleStatus, DefaultOutcome, DepartureEligibility, EngineResult, Group, GroupId,
    JoinOutcome, LockInOutcome, Member, MemberId, MemberRestrictions, RecipientInfo,
    ReplenishmentOutcome, ScheduleEntry, SufficiencyReport, TimeoutDecision, TransactionId,
    UnlockOutcome,
};
use crate::ports::inbound::{NewGroup, NewTransaction, SettlementApi};
use crate::ports::outbound::{EventPublisher, RecordStore, TimeSource};

pub struct SettlementEngine {
    ctx: Arc<EngineContext>,
    membership: MembershipService,
    confirmation: ConfirmationService,
    rotation: RotationService,
    lockin: LockInService,
    defaults: DefaultHandler,
}

impl SettlementEngine {
    /// # Errors
    /// - `Validation` if `config` is invalid
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn TimeSource>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        info!(
            lock_ttl_secs = config.lock_ttl_secs,
            confirm_max_retries = config.confirm_max_retries,
            "Settlement engine initialized"
        );

        let ctx = Arc::new(EngineContext::new(store, publisher, clock, config));
        let lockin = LockInService::new(Arc::clone(&ctx));
        Ok(Self {
            membership: MembershipService::new(Arc::clone(&ctx)),
            confirmation: ConfirmationService::new(Arc::clone(&ctx)),
            rotation: RotationService::new(Arc::clone(&ctx), lockin.clone()),
            defaults: DefaultHandler::new(Arc::clone(&ctx)),
            lockin,
            ctx,
        })
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.ctx.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn rotation(&self) -> &RotationService {
        &self.rotation
    }

    /// Start the periodic expired-lease sweep.
    pub fn spawn_lock_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.ctx.locks.spawn_sweeper(self.ctx.config.sweep_interval())
    }
}

#[async_trait]
impl SettlementApi for SettlementEngine {
    async fn create_group(&self, request: NewGroup) -> EngineResult<Group> {
        self.membership.create_group(request).await
    }

    async fn get_group(&self, group_id: GroupId) -> EngineResult<Group> {
        self.membership.get_group(group_id).await
    }

    async fn list_members(&self, group_id: GroupId) -> EngineResult<Vec<Member>> {
        self.membership.list_members(group_id).await
    }

    async fn join_group(
        &self,
        group_id: GroupId,
        member_id: Option<MemberId>,
        preferred_position: Option<u32>,
    ) -> EngineResult<JoinOutcome> {
        self.membership
            .join_group(group_id, member_id, preferred_position)
            .await
    }

    async fn confirm_security_deposit(&self, member_id: MemberId) -> EngineResult<Member> {
        self.membership.confirm_security_deposit(member_id).await
    }

    async fn start_rotation(&self, group_id: GroupId) -> EngineResult<RecipientInfo> {
        self.rotation.start_rotation(group_id).await
    }

    async fn leave_group(&self, member_id: MemberId) -> EngineResult<Member> {
        self.membership.leave_group(member_id).await
    }

    async fn create_transaction(&self, request: NewTransaction) -> EngineResult<Contribution> {
        self.confirmation.create_transaction(request).await
    }

    async fn confirm_transaction(
        &self,
        transaction_id: TransactionId,
        member_id: MemberId,
        side: ConfirmationSide,
    ) -> EngineResult<ConfirmationOutcome> {
        self.confirmation.confirm(transaction_id, member_id, side).await
    }

    async fn get_transaction(&self, transaction_id: TransactionId) -> EngineResult<Contribution> {
        self.confirmation.get_transaction(transaction_id).await
    }

    async fn pending_confirmations(&self, member_id: MemberId) -> EngineResult<Vec<Contribution>> {
        self.confirmation.pending_confirmations(member_id).await
    }

    async fn get_current_rotation(&self, group_id: GroupId) -> EngineResult<RecipientInfo> {
        self.rotation.get_current_recipient(group_id).await
    }

    async fn get_rotation_schedule(&self, group_id: GroupId) -> EngineResult<Vec<ScheduleEntry>> {
        self.rotation.get_rotation_schedule(group_id).await
    }

    async fn validate_rotation_advancement(&self, group_id: GroupId) -> EngineResult<AdvancementCheck> {
        self.rotation.validate_advancement(group_id).await
    }

    async fn advance_rotation(&self, group_id: GroupId) -> EngineResult<AdvanceOutcome> {
        self.rotation.advance(group_id).await
    }

    async fn is_rotation_complete(&self, group_id: GroupId, recipient_id: MemberId) -> EngineResult<bool> {
        self.rotation.is_rotation_complete(group_id, recipient_id).await
    }

    async fn analyze_deposit_sufficiency(&self, group_id: GroupId) -> EngineResult<SufficiencyReport> {
        self.membership.analyze_deposit_sufficiency(group_id).await
    }

    async fn validate_no_loss_guarantee(&self, group_id: GroupId) -> EngineResult<bool> {
        self.membership.validate_no_loss_guarantee(group_id).await
    }

    async fn validate_departure_eligibility(&self, member_id: MemberId) -> EngineResult<DepartureEligibility> {
        self.lockin.validate_departure_eligibility(member_id).await
    }

    async fn get_member_restrictions(&self, member_id: MemberId) -> EngineResult<MemberRestrictions> {
        self.lockin.get_member_restrictions(member_id).await
    }

    async fn check_cycle_completion(&self, group_id: GroupId) -> EngineResult<CycleStatus> {
        self.lockin.check_cycle_completion(group_id).await
    }

    async fn trigger_lock_in(&self, member_id: MemberId, payout_amount: Decimal) -> EngineResult<LockInOutcome> {
        self.lockin.trigger_lock_in(member_id, payout_amount).await
    }

    async fn unlock_members_after_cycle_completion(&self, group_id: GroupId) -> EngineResult<UnlockOutcome> {
        self.lockin.unlock_members_after_cycle_completion(group_id).await
    }

    async fn check_contribution_timeout(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        deadline: DateTime<Utc>,
    ) -> EngineResult<TimeoutDecision> {
        self.defaults
            .check_contribution_timeout(group_id, member_id, deadline)
            .await
    }

    async fn handle_default(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        reason: &str,
    ) -> EngineResult<DefaultOutcome> {
        self.defaults.handle_default(group_id, member_id, reason).await
    }

    async fn replenish_deposit(&self, member_id: MemberId, amount: Decimal) -> EngineResult<ReplenishmentOutcome> {
        self.defaults.replenish_deposit(member_id, amount).await
    }

    async fn audit_group(&self, group_id: GroupId) -> EngineResult<Vec<ConsistencyIssue>> {
        self.membership.audit_group(group_id).await
    }
}
