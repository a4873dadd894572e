//! # Security Lock-In Service
//!
//! A member who has collected the pot cannot walk away before the cycle
//! finishes: at the moment they become the recipient their deposit is locked
//! and they are flagged as paid out. Once `total_rotations_completed`
//! reaches the rotation size every locked member is released and their
//! collateral is due back. A deposit spent on default covers is not returned.
//!
//! ```text
//! deposit:  pending ──confirm──→ confirmed ──lock-in──→ locked ──cycle complete──→ returned
//! member:   is_locked_in=false              true                  false
//! ```

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::EngineContext;
use crate::domain::deposit::required_after_default;
use crate::domain::rotation::{self, cycle_in_progress};
use crate::domain::{
    CycleStatus, DepartureEligibility, DepositStatus, EngineError, EngineResult, Group, GroupId,
    LockInOutcome, LockType, Member, MemberId, MemberRestrictions, MemberStatus, Restriction,
    RestrictionKind, SecurityStatus, UnlockOutcome,
};
use crate::events::EngineEvent;
use crate::ports::outbound::Precondition;

#[derive(Clone)]
pub struct LockInService {
    ctx: Arc<EngineContext>,
}

impl LockInService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// A member can be locked in once: deposit confirmed, no payout yet.
    pub fn check_eligible(member: &Member) -> EngineResult<()> {
        if member.has_received_payout {
            return Err(EngineError::business(format!(
                "member {} has already received a payout",
                member.id
            )));
        }
        if member.security_deposit_status != DepositStatus::Confirmed {
            return Err(EngineError::business(format!(
                "security deposit of member {} is {}, not confirmed",
                member.id, member.security_deposit_status
            )));
        }
        Ok(())
    }

    /// Lock in a member who is becoming the recipient.
    ///
    /// Caller holds the group's `rotation_advance` lease. The write is also
    /// guarded on `has_received_payout == false` at the store, so a second
    /// lock-in can never land.
    pub(crate) async fn lock_in_held(
        &self,
        member: &Member,
        payout_amount: Decimal,
    ) -> EngineResult<(Member, LockInOutcome)> {
        Self::check_eligible(member)?;

        let locked_at = self.ctx.clock.now();
        let mut locked = member.clone();
        locked.has_received_payout = true;
        locked.is_locked_in = true;
        locked.security_deposit_status = DepositStatus::Locked;

        let guard = Precondition::AllOf(vec![
            Precondition::field_equals("has_received_payout", false),
            Precondition::field_equals("security_deposit_status", DepositStatus::Confirmed),
        ]);
        if !self.ctx.repo.update_member_if(&locked, guard).await?.is_applied() {
            return Err(EngineError::business(format!(
                "member {} changed during lock-in",
                member.id
            )));
        }

        info!(
            group_id = %member.group_id,
            member_id = %member.id,
            payout = %payout_amount,
            deposit = %member.security_deposit_amount,
            "Member locked in"
        );
        Ok((
            locked,
            LockInOutcome {
                member_id: member.id,
                payout_amount,
                locked_at,
            },
        ))
    }

    /// Lock in `member_id`, who must be the group's current recipient.
    ///
    /// # Errors
    /// - `BusinessLogic`: not the current recipient, deposit not confirmed,
    ///   or already paid out
    pub async fn trigger_lock_in(
        &self,
        member_id: MemberId,
        payout_amount: Decimal,
    ) -> EngineResult<LockInOutcome> {
        let member = self.ctx.repo.member(member_id).await?;
        let group_id = member.group_id;

        let outcome = self
            .ctx
            .locks
            .with_lock(
                LockType::RotationAdvance,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || async {
                    let group = self.ctx.repo.group(group_id).await?;
                    let members = self.ctx.repo.members_of(group_id).await?;
                    let ordered = rotation::rotation_order(&members);
                    rotation::check_dense_ordering(&group, &ordered)?;

                    let current = rotation::current_recipient(&group, &ordered)
                        .ok_or_else(|| EngineError::inconsistent(group_id, "no current recipient"))?;
                    if current.id != member_id {
                        return Err(EngineError::business(format!(
                            "member {} is not the current recipient",
                            member_id
                        )));
                    }
                    let (_, outcome) = self.lock_in_held(current, payout_amount).await?;
                    Ok(outcome)
                },
            )
            .await?;

        self.ctx.publish(vec![EngineEvent::MemberLockedIn {
            group_id,
            member_id,
            locked_at: outcome.locked_at,
        }]);
        Ok(outcome)
    }

    /// Release every locked member of a completed cycle.
    ///
    /// Caller holds the group's `rotation_advance` lease.
    pub(crate) async fn unlock_held(
        &self,
        group: &Group,
        members: &[Member],
    ) -> EngineResult<(Vec<MemberId>, Vec<EngineEvent>)> {
        let in_rotation = members.iter().filter(|m| m.in_rotation()).count();
        if !group.is_cycle_complete(in_rotation) {
            return Err(EngineError::business(format!(
                "cycle not complete: {} of {} rotations done",
                group.total_rotations_completed, in_rotation
            )));
        }

        let mut unlocked = Vec::new();
        let mut events = Vec::new();
        for member in members.iter().filter(|m| m.is_locked_in) {
            let mut released = member.clone();
            released.is_locked_in = false;
            // A spent deposit stays with the group.
            if released.security_deposit_status != DepositStatus::Used {
                released.security_deposit_status = DepositStatus::Returned;
                events.push(EngineEvent::DepositReturnDue {
                    group_id: group.id,
                    member_id: released.id,
                    amount: released.security_deposit_amount,
                });
            }
            self.ctx.repo.save_member(&released).await?;
            unlocked.push(released.id);
        }

        if !unlocked.is_empty() {
            info!(group_id = %group.id, count = unlocked.len(), "Members unlocked after cycle completion");
            events.push(EngineEvent::MembersUnlocked {
                group_id: group.id,
                member_ids: unlocked.clone(),
            });
        }
        Ok((unlocked, events))
    }

    /// # Errors
    /// - `BusinessLogic`: `total_rotations_completed` is below the active
    ///   member count
    pub async fn unlock_members_after_cycle_completion(
        &self,
        group_id: GroupId,
    ) -> EngineResult<UnlockOutcome> {
        let (unlocked_member_ids, events) = self
            .ctx
            .locks
            .with_lock(
                LockType::RotationAdvance,
                &group_id.to_string(),
                self.ctx.locks.default_ttl(),
                || async {
                    let group = self.ctx.repo.group(group_id).await?;
                    let members = self.ctx.repo.members_of(group_id).await?;
                    self.unlock_held(&group, &members).await
                },
            )
            .await?;

        self.ctx.publish(events);
        Ok(UnlockOutcome {
            group_id,
            unlocked_member_ids,
        })
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub async fn check_cycle_completion(&self, group_id: GroupId) -> EngineResult<CycleStatus> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        Ok(cycle_status(&group, &members))
    }

    pub async fn validate_departure_eligibility(
        &self,
        member_id: MemberId,
    ) -> EngineResult<DepartureEligibility> {
        let member = self.ctx.repo.member(member_id).await?;
        let group = self.ctx.repo.group(member.group_id).await?;
        let members = self.ctx.repo.members_of(group.id).await?;

        let (restrictions, _) = restrictions_for(&member, &group, &members);
        Ok(DepartureEligibility {
            member_id,
            eligible: departure_allowed(&member),
            restrictions,
            cycle_status: cycle_status(&group, &members),
            security_status: SecurityStatus {
                deposit_status: member.security_deposit_status,
                is_locked_in: member.is_locked_in,
                has_received_payout: member.has_received_payout,
            },
        })
    }

    pub async fn get_member_restrictions(&self, member_id: MemberId) -> EngineResult<MemberRestrictions> {
        let member = self.ctx.repo.member(member_id).await?;
        let group = self.ctx.repo.group(member.group_id).await?;
        let members = self.ctx.repo.members_of(group.id).await?;

        let (restrictions, obligations) = restrictions_for(&member, &group, &members);
        Ok(MemberRestrictions {
            member_id,
            can_leave: leave_permitted(&member, &group, &members),
            restrictions,
            obligations,
        })
    }
}

/// Not locked in, and the deposit is neither unconfirmed nor spent.
pub fn departure_allowed(member: &Member) -> bool {
    !member.is_locked_in
        && !matches!(
            member.security_deposit_status,
            DepositStatus::Pending | DepositStatus::Used
        )
}

/// An active member may leave between cycles. A defaulter already out of
/// the rotation may leave once their deposit is back in good standing.
pub fn leave_permitted(member: &Member, group: &Group, members: &[Member]) -> bool {
    if member.in_rotation() {
        member.is_active() && departure_allowed(member) && !cycle_in_progress(group, members)
    } else {
        member.status == MemberStatus::Defaulted && departure_allowed(member)
    }
}

pub fn cycle_status(group: &Group, members: &[Member]) -> CycleStatus {
    let total_members = members.iter().filter(|m| m.in_rotation()).count();
    CycleStatus {
        group_id: group.id,
        total_members,
        completed_rotations: group.total_rotations_completed,
        remaining_rotations: (total_members as u64).saturating_sub(group.total_rotations_completed),
        is_cycle_complete: group.is_cycle_complete(total_members),
        locked_member_ids: members
            .iter()
            .filter(|m| m.is_locked_in)
            .map(|m| m.id)
            .collect(),
    }
}

/// Itemized `(restrictions, obligations)` for a member.
fn restrictions_for(member: &Member, group: &Group, members: &[Member]) -> (Vec<Restriction>, Vec<Restriction>) {
    let mut restrictions = Vec::new();
    let mut obligations = Vec::new();

    if member.is_locked_in {
        restrictions.push(Restriction {
            kind: RestrictionKind::SecurityLockin,
            description: "Locked in after receiving a payout until the cycle completes".to_string(),
            amount: Some(member.security_deposit_amount),
        });
    }

    match member.security_deposit_status {
        DepositStatus::Pending => restrictions.push(Restriction {
            kind: RestrictionKind::SecurityDeposit,
            description: "Security deposit has not been confirmed".to_string(),
            amount: Some(member.security_deposit_amount),
        }),
        DepositStatus::Used => {
            let rotation_len = members.iter().filter(|m| m.in_rotation()).count() as u32;
            let shortfall = required_after_default(group, member, rotation_len)
                .ok()
                .map(|required| (required - member.security_deposit_amount).max(Decimal::ZERO));
            restrictions.push(Restriction {
                kind: RestrictionKind::DepositReplenishment,
                description: "Security deposit was used to cover a default and must be replenished"
                    .to_string(),
                amount: shortfall,
            });
        }
        _ => {}
    }

    if member.is_active() && cycle_in_progress(group, members) {
        let rotation_len = members.iter().filter(|m| m.in_rotation()).count() as u64;
        obligations.push(Restriction {
            kind: RestrictionKind::ContinuedParticipation,
            description: format!(
                "Must keep contributing until the cycle completes ({} of {} rotations done)",
                group.total_rotations_completed, rotation_len
            ),
            amount: Some(group.contribution_amount),
        });
    }

    (restrictions, obligations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultRecord, RotationFrequency};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn member(status: DepositStatus) -> Member {
        let mut m = Member::new(MemberId::new(), GroupId::new(), 1, dec!(1000), Utc::now());
        m.security_deposit_status = status;
        m
    }

    #[test]
    fn test_eligibility_requires_confirmed_deposit() {
        assert!(LockInService::check_eligible(&member(DepositStatus::Confirmed)).is_ok());
        assert!(LockInService::check_eligible(&member(DepositStatus::Pending)).is_err());
        assert!(LockInService::check_eligible(&member(DepositStatus::Used)).is_err());
    }

    #[test]
    fn test_eligibility_rejects_second_lock_in() {
        let mut m = member(DepositStatus::Confirmed);
        m.has_received_payout = true;
        let err = LockInService::check_eligible(&m).unwrap_err();
        assert!(err.to_string().contains("already received a payout"));
    }

    #[test]
    fn test_departure_rules() {
        assert!(departure_allowed(&member(DepositStatus::Confirmed)));
        assert!(departure_allowed(&member(DepositStatus::Returned)));
        assert!(!departure_allowed(&member(DepositStatus::Pending)));
        assert!(!departure_allowed(&member(DepositStatus::Used)));

        let mut locked = member(DepositStatus::Locked);
        locked.is_locked_in = true;
        assert!(!departure_allowed(&locked));
    }

    #[test]
    fn test_restrictions_itemized() {
        let group = Group::new(dec!(500), RotationFrequency::Weekly, 3, dec!(1), Utc::now());
        let mut paid = Member::new(MemberId::new(), group.id, 1, dec!(1000), Utc::now());
        paid.is_locked_in = true;
        paid.has_received_payout = true;
        paid.security_deposit_status = DepositStatus::Locked;
        let other = Member::new(MemberId::new(), group.id, 2, dec!(0), Utc::now());
        // Defaulted from slot 2 of 3 before being paid, then taken out.
        let mut used = Member::new(MemberId::new(), group.id, 0, dec!(0), Utc::now());
        used.status = MemberStatus::Defaulted;
        used.security_deposit_status = DepositStatus::Used;
        used.default_record = Some(DefaultRecord {
            cycle: 0,
            position: 2,
            total_members: 3,
        });
        let members = vec![used.clone(), paid.clone(), other];

        let (restrictions, obligations) = restrictions_for(&paid, &group, &members);
        assert_eq!(restrictions[0].kind, RestrictionKind::SecurityLockin);
        assert_eq!(obligations[0].kind, RestrictionKind::ContinuedParticipation);

        let (restrictions, obligations) = restrictions_for(&used, &group, &members);
        assert_eq!(restrictions[0].kind, RestrictionKind::DepositReplenishment);
        assert_eq!(restrictions[0].amount, Some(dec!(500.00)));
        assert!(obligations.is_empty());
        assert!(!leave_permitted(&used, &group, &members));

        used.security_deposit_status = DepositStatus::Confirmed;
        assert!(leave_permitted(&used, &group, &members));
    }

    #[test]
    fn test_cycle_status_counts() {
        let mut group = Group::new(dec!(500), RotationFrequency::Weekly, 3, dec!(1), Utc::now());
        group.total_rotations_completed = 1;
        let mut a = Member::new(MemberId::new(), group.id, 1, dec!(500), Utc::now());
        a.is_locked_in = true;
        let b = Member::new(MemberId::new(), group.id, 2, dec!(0), Utc::now());
        let status = cycle_status(&group, &[a.clone(), b]);
        assert_eq!(status.total_members, 2);
        assert_eq!(status.remaining_rotations, 1);
        assert!(!status.is_cycle_complete);
        assert_eq!(status.locked_member_ids, vec![a.id]);
    }
}
