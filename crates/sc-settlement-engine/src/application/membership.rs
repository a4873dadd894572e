//! # Membership Service
//!
//! Group creation, joins, departures and deposit confirmation.
//!
//! Membership changes are only allowed before the rotation starts (joins) or
//! outside a running cycle (departures), and always under the group's
//! `member_join` lease. Every change re-densifies rotation positions to
//! `1..=N` and re-sizes each member's deposit for the new count; any excess
//! a held deposit no longer needs is due back.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::lockin::departure_allowed;
use super::{roster, EngineContext};
use crate::domain::deposit;
use crate::domain::invariants;
use crate::domain::rotation::{self, cycle_in_progress, rotation_order, rotation_started};
use crate::domain::{
    ConsistencyIssue, DepositStatus, EngineError, EngineResult, Group, GroupId, JoinOutcome,
    LockType, Member, MemberId, MemberStatus, SufficiencyReport, OUT_OF_ROTATION,
};
use crate::events::EngineEvent;
use crate::ports::inbound::NewGroup;
use crate::ports::outbound::Precondition;

#[derive(Clone)]
pub struct MembershipService {
    ctx: Arc<EngineContext>,
}

impl MembershipService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// # Errors
    /// - `Validation`: non-positive contribution, fewer than two seats, or a
    ///   multiplier below one
    pub async fn create_group(&self, request: NewGroup) -> EngineResult<Group> {
        if request.contribution_amount <= Decimal::ZERO {
            return Err(EngineError::validation("contribution amount must be positive"));
        }
        if request.member_limit < 2 {
            return Err(EngineError::validation("member limit must be at least 2"));
        }
        if request.security_deposit_multiplier < Decimal::ONE {
            return Err(EngineError::validation("security deposit multiplier must be at least 1"));
        }

        let group = Group::new(
            request.contribution_amount,
            request.rotation_frequency,
            request.member_limit,
            request.security_deposit_multiplier,
            self.ctx.clock.now(),
        );
        self.ctx.repo.insert_group(&group).await?;

        info!(
            group_id = %group.id,
            contribution = %group.contribution_amount,
            member_limit = group.member_limit,
            "Group created"
        );
        Ok(group)
    }

    pub async fn get_group(&self, group_id: GroupId) -> EngineResult<Group> {
        self.ctx.repo.group(group_id).await
    }

    /// Every member of the group, any status, in rotation order.
    pub async fn list_members(&self, group_id: GroupId) -> EngineResult<Vec<Member>> {
        self.ctx.repo.group(group_id).await?;
        self.ctx.repo.members_of(group_id).await
    }

    /// Admit a member at `preferred_position` (shifting later members down)
    /// or at the end.
    ///
    /// # Errors
    /// - `BusinessLogic`: group closed, full, rotation already started, or
    ///   the member id is taken
    /// - `Validation`: preferred position outside `1..=N+1`
    pub async fn join_group(
        &self,
        group_id: GroupId,
        member_id: Option<MemberId>,
        preferred_position: Option<u32>,
    ) -> EngineResult<JoinOutcome> {
        let (outcome, events) = self
            .ctx
            .locks
            .with_lock(
                LockType::MemberJoin,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || self.join_held(group_id, member_id, preferred_position),
            )
            .await?;

        self.ctx.publish(events);
        Ok(outcome)
    }

    async fn join_held(
        &self,
        group_id: GroupId,
        member_id: Option<MemberId>,
        preferred_position: Option<u32>,
    ) -> EngineResult<(JoinOutcome, Vec<EngineEvent>)> {
        let group = self.ctx.repo.group(group_id).await?;
        if group.is_closed() {
            return Err(EngineError::business("group is closed"));
        }

        let members = self.ctx.repo.members_of(group_id).await?;
        let mut ordered = rotation_order(&members);
        rotation::check_dense_ordering(&group, &ordered)?;
        if ordered.len() as u32 >= group.member_limit {
            return Err(EngineError::business(format!(
                "group is full ({} members)",
                group.member_limit
            )));
        }
        if rotation_started(&group, &members) {
            return Err(EngineError::business("rotation has already started"));
        }

        let member_id = member_id.unwrap_or_default();
        if self.ctx.repo.find_member(member_id).await?.is_some() {
            return Err(EngineError::business(format!("member {} already exists", member_id)));
        }

        let n = ordered.len() as u32;
        let position = rotation::join_position(n, preferred_position)?;
        for member in ordered.iter_mut().filter(|m| m.rotation_position >= position) {
            member.rotation_position += 1;
        }

        let breakdown = deposit::breakdown(
            group.contribution_amount,
            position,
            n + 1,
            group.security_deposit_multiplier,
        )?;
        let joined = Member::new(
            member_id,
            group_id,
            position,
            breakdown.deposit_amount,
            self.ctx.clock.now(),
        );

        // A shifted member keeps the same deposit, so persist the move here.
        for member in ordered.iter().filter(|m| m.rotation_position > position) {
            self.ctx.repo.save_member(member).await?;
        }
        let events = roster::resize_deposits(&self.ctx, &group, &mut ordered, n + 1).await?;
        self.ctx.repo.insert_member(&joined).await?;

        info!(
            group_id = %group_id,
            member_id = %member_id,
            position,
            deposit = %joined.security_deposit_amount,
            "Member joined"
        );
        let outcome = JoinOutcome {
            member: joined,
            deposit: breakdown,
        };
        Ok((outcome, events))
    }

    /// Deposit status `pending -> confirmed`.
    ///
    /// # Errors
    /// - `BusinessLogic`: the deposit is not pending, or the member is not
    ///   active
    pub async fn confirm_security_deposit(&self, member_id: MemberId) -> EngineResult<Member> {
        let group_id = self.ctx.repo.member(member_id).await?.group_id;

        self.ctx
            .locks
            .with_lock(
                LockType::MemberJoin,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || async {
                    let member = self.ctx.repo.member(member_id).await?;
                    if !member.is_active() {
                        return Err(EngineError::business(format!(
                            "member {} is not active",
                            member_id
                        )));
                    }
                    if member.security_deposit_status != DepositStatus::Pending {
                        return Err(EngineError::business(format!(
                            "security deposit of member {} is {}, not pending",
                            member_id, member.security_deposit_status
                        )));
                    }

                    let mut confirmed = member.clone();
                    confirmed.security_deposit_status = DepositStatus::Confirmed;
                    let guard =
                        Precondition::field_equals("security_deposit_status", DepositStatus::Pending);
                    if !self.ctx.repo.update_member_if(&confirmed, guard).await?.is_applied() {
                        return Err(EngineError::concurrency(format!(
                            "member {} changed during deposit confirmation",
                            member_id
                        )));
                    }

                    info!(
                        group_id = %group_id,
                        member_id = %member_id,
                        amount = %confirmed.security_deposit_amount,
                        "Security deposit confirmed"
                    );
                    Ok(confirmed)
                },
            )
            .await
    }

    /// Remove a member outside a running cycle and return their deposit.
    ///
    /// A defaulter already out of the rotation may also leave once their
    /// deposit has been replenished.
    ///
    /// # Errors
    /// - `BusinessLogic`: not active, suspended, locked in, deposit pending
    ///   or used, or a cycle is in progress
    pub async fn leave_group(&self, member_id: MemberId) -> EngineResult<Member> {
        let group_id = self.ctx.repo.member(member_id).await?.group_id;

        let (left, events) = self
            .ctx
            .locks
            .with_lock(
                LockType::MemberJoin,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || self.leave_held(group_id, member_id),
            )
            .await?;

        self.ctx.publish(events);
        Ok(left)
    }

    async fn leave_held(
        &self,
        group_id: GroupId,
        member_id: MemberId,
    ) -> EngineResult<(Member, Vec<EngineEvent>)> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        let member = self.ctx.repo.member(member_id).await?;

        let defaulted_out = !member.in_rotation() && member.status == MemberStatus::Defaulted;
        if !member.is_active() && !defaulted_out {
            return Err(EngineError::business(format!("member {} is not active", member_id)));
        }
        if !departure_allowed(&member) {
            return Err(EngineError::business(format!(
                "member {} cannot leave: locked in or deposit {}",
                member_id, member.security_deposit_status
            )));
        }
        if !defaulted_out && cycle_in_progress(&group, &members) {
            return Err(EngineError::business("cannot leave while a cycle is in progress"));
        }

        let mut events = Vec::new();
        let mut left = member.clone();
        left.status = MemberStatus::Left;
        left.rotation_position = OUT_OF_ROTATION;
        if left.security_deposit_status == DepositStatus::Confirmed {
            left.security_deposit_status = DepositStatus::Returned;
            events.push(EngineEvent::DepositReturnDue {
                group_id,
                member_id,
                amount: left.security_deposit_amount,
            });
        }

        let remaining = if defaulted_out {
            self.ctx.repo.save_member(&left).await?;
            rotation_order(&members).len()
        } else {
            let withdrawal =
                roster::withdraw(&self.ctx, &group, &rotation_order(&members), &[left.clone()]).await?;
            events.extend(withdrawal.events);
            withdrawal.remaining.len()
        };

        info!(
            group_id = %group_id,
            member_id = %member_id,
            remaining,
            "Member left group"
        );
        Ok((left, events))
    }

    // =========================================================================
    // DEPOSIT ANALYSIS AND AUDIT
    // =========================================================================

    pub async fn analyze_deposit_sufficiency(&self, group_id: GroupId) -> EngineResult<SufficiencyReport> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        deposit::analyze_sufficiency(&group, &members)
    }

    pub async fn validate_no_loss_guarantee(&self, group_id: GroupId) -> EngineResult<bool> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        Ok(deposit::validate_no_loss_guarantee(&group, &members))
    }

    /// Read-only consistency audit. Issues are logged and returned, never
    /// repaired.
    pub async fn audit_group(&self, group_id: GroupId) -> EngineResult<Vec<ConsistencyIssue>> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        let transactions = self.ctx.repo.transactions_of(group_id).await?;

        let issues = invariants::audit(&group, &members, &transactions);
        for issue in &issues {
            warn!(
                group_id = %group_id,
                kind = ?issue.kind,
                severity = ?issue.severity,
                "{}",
                issue.description
            );
        }
        Ok(issues)
    }
}
