//! # Default Handling
//!
//! When a member misses a contribution past its deadline the scheduler asks
//! `check_contribution_timeout`, and if a default is due calls
//! `handle_default`. The missed share is covered from the member's security
//! deposit as an automatically confirmed `default_cover` transfer.
//!
//! | Defaulter | Rotation | Deposit |
//! |-----------|----------|---------|
//! | not yet paid out | removed now, positions re-densified | `used` |
//! | already paid out | suspended in the slot until the pass ends | `used`, covers every later share |
//!
//! A suspended member never receives again. The rotation controller covers
//! their share for each later recipient of the pass and releases them when
//! the cursor reaches their slot or the pass ends. A spent deposit can be
//! topped up with `replenish_deposit`.
//!
//! ## Leases
//!
//! `default_handling`, then `rotation_advance`, then `member_join`, all on
//! the group. Removing a member moves the cursor and the positions, so the
//! rotation and membership leases are both required.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::{roster, EngineContext};
use crate::domain::deposit;
use crate::domain::rotation::{self, rotation_order};
use crate::domain::{
    ConfirmationStatus, Contribution, DefaultOutcome, DefaultRecord, DepositStatus, EngineError,
    EngineResult, Group, GroupId, LockType, MemberId, MemberStatus, ReplenishmentOutcome,
    TimeoutDecision, TransactionId, TransactionType, OUT_OF_ROTATION,
};
use crate::events::EngineEvent;
use crate::ports::outbound::Precondition;

#[derive(Clone)]
pub struct DefaultHandler {
    ctx: Arc<EngineContext>,
}

/// Whether `member` has paid toward `recipient` in the current pass.
fn has_paid(transactions: &[Contribution], member: MemberId, recipient: MemberId, group: &Group) -> bool {
    transactions.iter().any(|tx| {
        tx.from_member == member
            && tx.to_member == recipient
            && tx.cycle == group.total_rotations_completed
            && tx.transaction_type.settles_rotation_share()
            && tx.sender_confirmed_at.is_some()
    })
}

impl DefaultHandler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Decide whether `member_id` is in default for the current rotation.
    /// Writes nothing.
    pub async fn check_contribution_timeout(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        deadline: DateTime<Utc>,
    ) -> EngineResult<TimeoutDecision> {
        let decision = |should_default: bool, reason: &str| TimeoutDecision {
            group_id,
            member_id,
            should_default,
            reason: reason.to_string(),
        };

        let now = self.ctx.clock.now();
        if now <= deadline + self.ctx.config.grace_period() {
            return Ok(decision(false, "deadline has not passed"));
        }

        let group = self.ctx.repo.group(group_id).await?;
        if group.is_closed() {
            return Ok(decision(false, "group is closed"));
        }
        let member = self.ctx.repo.member(member_id).await?;
        if member.group_id != group_id || !member.is_active() {
            return Ok(decision(false, "member is not active in this group"));
        }

        let members = self.ctx.repo.members_of(group_id).await?;
        let ordered = rotation_order(&members);
        let recipient = rotation::current_recipient(&group, &ordered)
            .ok_or_else(|| EngineError::inconsistent(group_id, "no current recipient"))?;
        if recipient.id == member_id {
            return Ok(decision(false, "member is the current recipient"));
        }

        let transactions = self.ctx.repo.transactions_to(group_id, recipient.id).await?;
        if has_paid(&transactions, member_id, recipient.id, &group) {
            return Ok(decision(false, "contribution already made"));
        }

        debug!(group_id = %group_id, member_id = %member_id, "Contribution overdue");
        Ok(decision(true, "contribution overdue"))
    }

    /// Cover the member's missed share from their deposit and suspend them,
    /// or take them out of the rotation if they have not been paid yet.
    ///
    /// # Errors
    /// - `BusinessLogic`: group closed, member inactive or the recipient,
    ///   share already paid, or the deposit cannot cover one contribution
    /// - `Concurrency`: one of the group leases is held
    pub async fn handle_default(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        reason: &str,
    ) -> EngineResult<DefaultOutcome> {
        let key = group_id.to_string();
        let ttl = self.ctx.locks.default_ttl();
        let locks = &self.ctx.locks;

        let (outcome, events) = locks
            .with_lock(LockType::DefaultHandling, &key, ttl, || async {
                locks
                    .with_lock(LockType::RotationAdvance, &key, ttl, || async {
                        locks
                            .with_lock(LockType::MemberJoin, &key, ttl, || {
                                self.default_held(group_id, member_id, reason)
                            })
                            .await
                    })
                    .await
            })
            .await?;

        self.ctx.publish(events);
        Ok(outcome)
    }

    async fn default_held(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        reason: &str,
    ) -> EngineResult<(DefaultOutcome, Vec<EngineEvent>)> {
        let group = self.ctx.repo.group(group_id).await?;
        if group.is_closed() {
            return Err(EngineError::business("group is closed"));
        }
        let members = self.ctx.repo.members_of(group_id).await?;
        let ordered = rotation_order(&members);
        rotation::check_dense_ordering(&group, &ordered)?;

        let member = ordered
            .iter()
            .find(|m| m.id == member_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::business(format!("member {} is not active in group {}", member_id, group_id))
            })?;
        if member.is_suspended() {
            return Err(EngineError::business(format!(
                "member {} has already defaulted",
                member_id
            )));
        }
        let recipient = rotation::current_recipient(&group, &ordered)
            .cloned()
            .ok_or_else(|| EngineError::inconsistent(group_id, "no current recipient"))?;
        if recipient.id == member_id {
            return Err(EngineError::business("the current recipient cannot default"));
        }

        let transactions = self.ctx.repo.transactions_to(group_id, recipient.id).await?;
        if has_paid(&transactions, member_id, recipient.id, &group) {
            return Err(EngineError::business(format!(
                "member {} already contributed to this rotation",
                member_id
            )));
        }

        if !matches!(
            member.security_deposit_status,
            DepositStatus::Confirmed | DepositStatus::Locked
        ) || member.security_deposit_amount < group.contribution_amount
        {
            return Err(EngineError::business(format!(
                "deposit of member {} ({}, {}) cannot cover a contribution of {}",
                member_id,
                member.security_deposit_status,
                member.security_deposit_amount,
                group.contribution_amount
            )));
        }

        let now = self.ctx.clock.now();
        let cover = Contribution {
            id: TransactionId::new(),
            group_id,
            from_member: member_id,
            to_member: recipient.id,
            amount: group.contribution_amount,
            transaction_type: TransactionType::DefaultCover,
            confirmation_status: ConfirmationStatus::BothConfirmed,
            sender_confirmed_at: Some(now),
            recipient_confirmed_at: Some(now),
            cycle: group.total_rotations_completed,
            note: Some(reason.to_string()),
            created_at: now,
        };
        self.ctx.repo.insert_transaction(&cover).await?;

        let mut defaulted = member.clone();
        defaulted.security_deposit_amount -= group.contribution_amount;
        defaulted.security_deposit_status = DepositStatus::Used;
        defaulted.status = MemberStatus::Defaulted;
        defaulted.default_record = Some(DefaultRecord {
            cycle: group.total_rotations_completed,
            position: member.rotation_position,
            total_members: ordered.len() as u32,
        });

        let mut events = vec![EngineEvent::TransactionCreated {
            group_id,
            transaction_id: cover.id,
            from_member: member_id,
            to_member: recipient.id,
            amount: cover.amount,
            transaction_type: TransactionType::DefaultCover,
        }];

        // A paid-out member keeps the slot and owes the rest of the pass.
        let suspended = member.has_received_payout;
        let new_current_position = if suspended {
            self.ctx.repo.save_member(&defaulted).await?;
            group.current_rotation_position
        } else {
            defaulted.rotation_position = OUT_OF_ROTATION;
            let withdrawal =
                roster::withdraw(&self.ctx, &group, &ordered, std::slice::from_ref(&defaulted)).await?;
            events.extend(withdrawal.events);
            withdrawal.group.current_rotation_position
        };

        info!(
            group_id = %group_id,
            member_id = %member_id,
            covered = %cover.amount,
            remaining_deposit = %defaulted.security_deposit_amount,
            suspended,
            reason,
            "Member defaulted; contribution covered from deposit"
        );

        events.push(EngineEvent::MemberDefaulted {
            group_id,
            member_id,
            covered_amount: cover.amount,
            reason: reason.to_string(),
        });
        events.push(EngineEvent::AdvancementCheckRequested {
            group_id,
            recipient_id: recipient.id,
        });

        let outcome = DefaultOutcome {
            group_id,
            member_id,
            remaining_deposit: defaulted.security_deposit_amount,
            new_current_position,
            suspended,
            cover,
        };
        Ok((outcome, events))
    }

    // =========================================================================
    // REPLENISHMENT (under the member_join lease)
    // =========================================================================

    /// Top up a deposit spent on default covers.
    ///
    /// Once the deposit reaches the requirement for the slot the member held
    /// when they defaulted it is back in good standing: `locked` while the
    /// member is still locked in, `confirmed` otherwise.
    ///
    /// # Errors
    /// - `Validation`: non-positive amount
    /// - `BusinessLogic`: group closed, or the deposit was not used
    /// - `Concurrency`: the `member_join` lease is held, or the deposit
    ///   changed underneath
    pub async fn replenish_deposit(&self, member_id: MemberId, amount: Decimal) -> EngineResult<ReplenishmentOutcome> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation("replenishment amount must be positive"));
        }
        let group_id = self.ctx.repo.member(member_id).await?.group_id;

        let (outcome, events) = self
            .ctx
            .locks
            .with_lock(
                LockType::MemberJoin,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || self.replenish_held(group_id, member_id, amount),
            )
            .await?;

        self.ctx.publish(events);
        Ok(outcome)
    }

    async fn replenish_held(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        amount: Decimal,
    ) -> EngineResult<(ReplenishmentOutcome, Vec<EngineEvent>)> {
        let group = self.ctx.repo.group(group_id).await?;
        if group.is_closed() {
            return Err(EngineError::business("group is closed"));
        }
        let member = self.ctx.repo.member(member_id).await?;
        if member.security_deposit_status != DepositStatus::Used {
            return Err(EngineError::business(format!(
                "security deposit of member {} is {}, not used",
                member_id, member.security_deposit_status
            )));
        }

        let members = self.ctx.repo.members_of(group_id).await?;
        let rotation_len = rotation_order(&members).len() as u32;
        let required_deposit = deposit::required_after_default(&group, &member, rotation_len)?;

        let mut topped = member.clone();
        topped.security_deposit_amount += amount;
        let restored = topped.security_deposit_amount >= required_deposit;
        if restored {
            topped.security_deposit_status = if topped.is_locked_in {
                DepositStatus::Locked
            } else {
                DepositStatus::Confirmed
            };
        }

        let guard = Precondition::field_equals("security_deposit_status", DepositStatus::Used);
        if !self.ctx.repo.update_member_if(&topped, guard).await?.is_applied() {
            return Err(EngineError::concurrency(format!(
                "member {} changed during deposit replenishment",
                member_id
            )));
        }

        info!(
            group_id = %group_id,
            member_id = %member_id,
            amount = %amount,
            deposit = %topped.security_deposit_amount,
            required = %required_deposit,
            restored,
            "Security deposit replenished"
        );
        let events = vec![EngineEvent::DepositReplenished {
            group_id,
            member_id,
            amount,
            new_deposit: topped.security_deposit_amount,
            restored,
        }];
        let outcome = ReplenishmentOutcome {
            member: topped,
            amount,
            required_deposit,
            restored,
        };
        Ok((outcome, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RotationFrequency;
    use rust_decimal_macros::dec;

    fn transfer(from: MemberId, to: MemberId, cycle: u64, sender_confirmed: bool) -> Contribution {
        Contribution {
            id: TransactionId::new(),
            group_id: GroupId::new(),
            from_member: from,
            to_member: to,
            amount: dec!(100),
            transaction_type: TransactionType::Contribution,
            confirmation_status: ConfirmationStatus::Pending,
            sender_confirmed_at: sender_confirmed.then(Utc::now),
            recipient_confirmed_at: None,
            cycle,
            note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_has_paid_requires_sender_confirmation_in_current_pass() {
        let group = Group::new(dec!(100), RotationFrequency::Weekly, 4, dec!(1), Utc::now());
        let (member, recipient) = (MemberId::new(), MemberId::new());

        assert!(!has_paid(&[transfer(member, recipient, 0, false)], member, recipient, &group));
        assert!(has_paid(&[transfer(member, recipient, 0, true)], member, recipient, &group));
        assert!(!has_paid(&[transfer(member, recipient, 1, true)], member, recipient, &group));
        assert!(!has_paid(&[transfer(recipient, member, 0, true)], member, recipient, &group));
    }
}
