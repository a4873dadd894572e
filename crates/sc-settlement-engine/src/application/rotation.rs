//! # Rotation State Machine
//!
//! Per-group controller over the rotation cursor.
//!
//! ```text
//! AWAITING_CONTRIBUTIONS(p) ──all N-1 shares settled──→ READY_TO_ADVANCE
//!          ↑                                                  │ advance()
//!          └────────────── AWAITING_CONTRIBUTIONS(p+1 mod N) ←┘
//!
//! CYCLE_COMPLETE once total_rotations_completed >= N
//! ```
//!
//! ## Exactly-once advancement
//!
//! `advance()` takes the group's `rotation_advance` lease, then re-derives
//! everything from storage and re-checks completion before writing. Of any
//! number of racing callers at most one holds the lease and sees the
//! rotation complete; the others get `Concurrency`, including once the final
//! step has closed the group. The cursor write itself
//! is also a compare-and-swap on the cursor value that was read.
//!
//! ## Crash recovery
//!
//! Advancing the cursor and locking in the new recipient are two writes. The
//! new recipient's lock-in eligibility is checked before the cursor moves, and
//! every advance starts by completing any lock-in or suspended-member cover a
//! previous worker did not finish. Suspended members leave the rotation
//! before the cursor moves, so an interrupted step leaves the cursor on the
//! same recipient. A retried call after a crash therefore re-derives state,
//! repairs it, and finds nothing left to advance.
//!
//! ## Leases
//!
//! `rotation_advance`, then `member_join`: a step can take suspended members
//! out of the rotation.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{roster, EngineContext, LockInService};
use crate::domain::rotation::{self, rotation_order};
use crate::domain::{
    AdvanceOutcome, AdvancementCheck, ConfirmationStatus, Contribution, DepositStatus, EngineError,
    EngineResult, Group, GroupId, GroupStatus, LockType, Member, MemberId, RecipientInfo,
    ScheduleEntry, TransactionId, TransactionType, OUT_OF_ROTATION,
};
use crate::events::EngineEvent;

/// Shares of the recipient's pot settled in the current pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletionCount {
    pub confirmed: usize,
    pub expected: usize,
}

impl CompletionCount {
    pub fn is_complete(&self) -> bool {
        self.confirmed == self.expected
    }

    pub fn pending(&self) -> usize {
        self.expected.saturating_sub(self.confirmed)
    }
}

/// Group state re-read from storage.
struct Snapshot {
    group: Group,
    members: Vec<Member>,
    ordered: Vec<Member>,
}

impl Snapshot {
    fn recipient(&self) -> EngineResult<&Member> {
        rotation::current_recipient(&self.group, &self.ordered).ok_or_else(|| {
            EngineError::inconsistent(
                self.group.id,
                format!(
                    "no active member at rotation position {}",
                    self.group.current_rotation_position + 1
                ),
            )
        })
    }

    fn active_count(&self) -> usize {
        self.ordered.len()
    }
}

#[derive(Clone)]
pub struct RotationService {
    ctx: Arc<EngineContext>,
    lockin: LockInService,
}

impl RotationService {
    pub fn new(ctx: Arc<EngineContext>, lockin: LockInService) -> Self {
        Self { ctx, lockin }
    }

    async fn snapshot(&self, group_id: GroupId) -> EngineResult<Snapshot> {
        let group = self.ctx.repo.group(group_id).await?;
        let members = self.ctx.repo.members_of(group_id).await?;
        let ordered = rotation_order(&members);
        rotation::check_dense_ordering(&group, &ordered)?;
        Ok(Snapshot {
            group,
            members,
            ordered,
        })
    }

    /// Count settled shares of `recipient`'s pot, fresh from storage.
    ///
    /// One share per distinct active sender: a both-confirmed contribution or
    /// default cover addressed to the recipient in the current pass.
    async fn completion_count(&self, snapshot: &Snapshot, recipient: MemberId) -> EngineResult<CompletionCount> {
        let cycle = snapshot.group.total_rotations_completed;
        let senders: HashSet<MemberId> = snapshot
            .ordered
            .iter()
            .map(|m| m.id)
            .filter(|id| *id != recipient)
            .collect();

        let settled: HashSet<MemberId> = self
            .ctx
            .repo
            .transactions_to(snapshot.group.id, recipient)
            .await?
            .into_iter()
            .filter(|tx| tx.settles_share_of(recipient, cycle) && senders.contains(&tx.from_member))
            .map(|tx| tx.from_member)
            .collect();

        Ok(CompletionCount {
            confirmed: settled.len(),
            expected: senders.len(),
        })
    }

    // =========================================================================
    // READS (lock-free, advisory)
    // =========================================================================

    /// # Errors
    /// - `DataConsistency` if no active member sits at the cursor
    pub async fn get_current_recipient(&self, group_id: GroupId) -> EngineResult<RecipientInfo> {
        let snapshot = self.snapshot(group_id).await?;
        Ok(rotation::recipient_info(snapshot.recipient()?))
    }

    pub async fn get_rotation_schedule(&self, group_id: GroupId) -> EngineResult<Vec<ScheduleEntry>> {
        let snapshot = self.snapshot(group_id).await?;
        Ok(rotation::build_schedule(&snapshot.group, &snapshot.ordered))
    }

    pub async fn is_rotation_complete(&self, group_id: GroupId, recipient_id: MemberId) -> EngineResult<bool> {
        let snapshot = self.snapshot(group_id).await?;
        if snapshot.active_count() < 2 {
            return Ok(false);
        }
        Ok(self.completion_count(&snapshot, recipient_id).await?.is_complete())
    }

    /// Whether the rotation could advance right now. A hint only; the answer
    /// may be stale by the time the caller acts on it.
    pub async fn validate_advancement(&self, group_id: GroupId) -> EngineResult<AdvancementCheck> {
        let snapshot = self.snapshot(group_id).await?;
        if snapshot.group.is_closed() {
            return Ok(AdvancementCheck::blocked("group is closed"));
        }
        if snapshot.active_count() < 2 {
            return Ok(AdvancementCheck::blocked("rotation needs at least two active members"));
        }

        let recipient = snapshot.recipient()?;
        let count = self.completion_count(&snapshot, recipient.id).await?;
        let reason = if count.is_complete() {
            None
        } else {
            Some(format!(
                "{} of {} contributions confirmed",
                count.confirmed, count.expected
            ))
        };

        Ok(AdvancementCheck {
            can_advance: count.is_complete(),
            current_recipient: Some(rotation::recipient_info(recipient)),
            confirmed_count: count.confirmed,
            expected_count: count.expected,
            pending_count: count.pending(),
            reason,
        })
    }

    // =========================================================================
    // MUTATIONS (under the rotation_advance lease)
    // =========================================================================

    /// Lock in the member at the cursor if they have not been paid yet.
    async fn ensure_recipient_locked_in(
        &self,
        snapshot: &mut Snapshot,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<()> {
        let recipient = snapshot.recipient()?.clone();
        if recipient.has_received_payout {
            return Ok(());
        }
        if rotation::rotation_started(&snapshot.group, &snapshot.members) {
            warn!(
                group_id = %snapshot.group.id,
                member_id = %recipient.id,
                "Completing lock-in left unfinished by an interrupted advancement"
            );
        }

        let payout = snapshot.group.payout_amount(snapshot.active_count());
        let (locked, outcome) = self.lockin.lock_in_held(&recipient, payout).await?;
        events.push(EngineEvent::MemberLockedIn {
            group_id: snapshot.group.id,
            member_id: locked.id,
            locked_at: outcome.locked_at,
        });
        events.push(EngineEvent::PayoutDue {
            group_id: snapshot.group.id,
            member_id: locked.id,
            amount: payout,
        });

        for slot in snapshot.ordered.iter_mut().chain(snapshot.members.iter_mut()) {
            if slot.id == locked.id {
                *slot = locked.clone();
            }
        }
        Ok(())
    }

    /// Open the rotation: lock in the first recipient. Idempotent.
    ///
    /// Also holds the `member_join` lease so membership cannot change while
    /// the first deposit is being locked.
    pub async fn start_rotation(&self, group_id: GroupId) -> EngineResult<RecipientInfo> {
        let key = group_id.to_string();
        let ttl = self.ctx.locks.default_ttl();

        let (info, events) = self
            .ctx
            .locks
            .with_lock(LockType::RotationAdvance, &key, ttl, || async {
                self.ctx
                    .locks
                    .with_lock(LockType::MemberJoin, &key, ttl, || async {
                        let mut snapshot = self.snapshot(group_id).await?;
                        if snapshot.group.is_closed() {
                            return Err(EngineError::business("group is closed"));
                        }
                        if snapshot.active_count() < 2 {
                            return Err(EngineError::business(
                                "rotation needs at least two active members",
                            ));
                        }

                        let mut events = Vec::new();
                        self.ensure_recipient_locked_in(&mut snapshot, &mut events).await?;
                        let info = rotation::recipient_info(snapshot.recipient()?);
                        Ok((info, events))
                    })
                    .await
            })
            .await?;

        if !events.is_empty() {
            info!(group_id = %group_id, member_id = %info.member_id, "Rotation started");
        }
        self.ctx.publish(events);
        Ok(info)
    }

    /// Cover each suspended member's share of the current recipient's pot
    /// from their deposit, where not already covered.
    async fn cover_suspended_shares(
        &self,
        snapshot: &mut Snapshot,
        events: &mut Vec<EngineEvent>,
    ) -> EngineResult<()> {
        let recipient = snapshot.recipient()?.id;
        let group = snapshot.group.clone();
        let owing: Vec<Member> = snapshot
            .ordered
            .iter()
            .filter(|m| m.is_suspended() && m.id != recipient)
            .cloned()
            .collect();
        if owing.is_empty() {
            return Ok(());
        }

        let received = self.ctx.repo.transactions_to(group.id, recipient).await?;
        let mut covered = 0;
        for member in owing {
            let settled = received.iter().any(|tx| {
                tx.from_member == member.id && tx.settles_share_of(recipient, group.total_rotations_completed)
            });
            if settled {
                continue;
            }
            if member.security_deposit_amount < group.contribution_amount {
                warn!(
                    group_id = %group.id,
                    member_id = %member.id,
                    deposit = %member.security_deposit_amount,
                    "Suspended member cannot cover a share"
                );
                continue;
            }

            let now = self.ctx.clock.now();
            let cover = Contribution {
                id: TransactionId::new(),
                group_id: group.id,
                from_member: member.id,
                to_member: recipient,
                amount: group.contribution_amount,
                transaction_type: TransactionType::DefaultCover,
                confirmation_status: ConfirmationStatus::BothConfirmed,
                sender_confirmed_at: Some(now),
                recipient_confirmed_at: Some(now),
                cycle: group.total_rotations_completed,
                note: Some("share of a suspended member".to_string()),
                created_at: now,
            };
            self.ctx.repo.insert_transaction(&cover).await?;

            let mut charged = member.clone();
            charged.security_deposit_amount -= group.contribution_amount;
            charged.security_deposit_status = DepositStatus::Used;
            self.ctx.repo.save_member(&charged).await?;
            for slot in snapshot.ordered.iter_mut().chain(snapshot.members.iter_mut()) {
                if slot.id == charged.id {
                    *slot = charged.clone();
                }
            }

            debug!(
                group_id = %group.id,
                member_id = %member.id,
                recipient_id = %recipient,
                remaining_deposit = %charged.security_deposit_amount,
                "Suspended member share covered"
            );
            events.push(EngineEvent::TransactionCreated {
                group_id: group.id,
                transaction_id: cover.id,
                from_member: member.id,
                to_member: recipient,
                amount: cover.amount,
                transaction_type: TransactionType::DefaultCover,
            });
            covered += 1;
        }

        if covered > 0 {
            info!(group_id = %group.id, recipient_id = %recipient, covered, "Suspended shares covered");
            events.push(EngineEvent::AdvancementCheckRequested {
                group_id: group.id,
                recipient_id: recipient,
            });
        }
        Ok(())
    }

    /// Advance the rotation by exactly one step.
    ///
    /// Suspended members leave the rotation as the step passes them: their
    /// remaining deposit is due back. A suspended member who can no longer
    /// cover the next recipient leaves with the deposit forfeited.
    ///
    /// # Errors
    /// - `Concurrency`: a lease is held, the group has already closed, or
    ///   the current recipient's contributions are not (or no longer)
    ///   complete
    /// - `BusinessLogic`: too few members, or the next recipient's deposit
    ///   is not confirmed
    /// - `DataConsistency`: rotation positions or cursor are corrupt
    pub async fn advance(&self, group_id: GroupId) -> EngineResult<AdvanceOutcome> {
        let key = group_id.to_string();
        let ttl = self.ctx.locks.default_ttl();

        let (outcome, events) = self
            .ctx
            .locks
            .with_lock(LockType::RotationAdvance, &key, ttl, || async {
                self.ctx
                    .locks
                    .with_lock(LockType::MemberJoin, &key, ttl, || self.advance_held(group_id))
                    .await
            })
            .await?;

        self.ctx.publish(events);
        Ok(outcome)
    }

    async fn advance_held(&self, group_id: GroupId) -> EngineResult<(AdvanceOutcome, Vec<EngineEvent>)> {
        let mut snapshot = self.snapshot(group_id).await?;
        if snapshot.group.is_closed() {
            // Another caller completed the cycle first.
            return Err(EngineError::concurrency(format!("group {} is already closed", group_id)));
        }
        if snapshot.active_count() < 2 {
            return Err(EngineError::business("rotation needs at least two active members"));
        }

        let mut events = Vec::new();
        self.ensure_recipient_locked_in(&mut snapshot, &mut events).await?;
        self.cover_suspended_shares(&mut snapshot, &mut events).await?;

        let recipient = snapshot.recipient()?.clone();
        let count = self.completion_count(&snapshot, recipient.id).await?;
        if !count.is_complete() {
            // A repaired lock-in has committed even though this call fails.
            self.ctx.publish(std::mem::take(&mut events));
            debug!(
                group_id = %group_id,
                confirmed = count.confirmed,
                expected = count.expected,
                "Advancement rejected: rotation not complete"
            );
            return Err(EngineError::concurrency(format!(
                "rotation for group {} is not complete ({} of {} confirmed)",
                group_id, count.confirmed, count.expected
            )));
        }

        let previous_position = snapshot.group.current_rotation_position;
        let previous_total = snapshot.group.total_rotations_completed;
        let step = rotation::step_to(&snapshot.ordered, previous_position + 1, previous_total);
        let next_id = match step.order.get(step.cursor as usize) {
            Some(next) => {
                if !next.has_received_payout {
                    LockInService::check_eligible(next)?;
                }
                next.id
            }
            None => return Err(EngineError::inconsistent(group_id, "no member left to receive")),
        };

        let contribution = snapshot.group.contribution_amount;
        let mut leaving: Vec<Member> = step.departing.iter().map(release_suspended).collect();
        for member in step.order.iter().filter(|m| {
            m.is_suspended() && m.id != next_id && m.security_deposit_amount < contribution
        }) {
            warn!(
                group_id = %group_id,
                member_id = %member.id,
                deposit = %member.security_deposit_amount,
                "Suspended member's deposit is exhausted; leaving the rotation"
            );
            let mut exhausted = member.clone();
            exhausted.rotation_position = OUT_OF_ROTATION;
            leaving.push(exhausted);
        }
        for member in &leaving {
            if member.security_deposit_status == DepositStatus::Returned
                && !member.security_deposit_amount.is_zero()
            {
                events.push(EngineEvent::DepositReturnDue {
                    group_id,
                    member_id: member.id,
                    amount: member.security_deposit_amount,
                });
            }
        }

        let (base, ordered) = if leaving.is_empty() {
            (snapshot.group.clone(), snapshot.ordered.clone())
        } else {
            let withdrawal = roster::withdraw(&self.ctx, &snapshot.group, &snapshot.ordered, &leaving).await?;
            events.extend(withdrawal.events);
            (withdrawal.group, withdrawal.remaining)
        };

        let new_position = ordered
            .iter()
            .position(|m| m.id == next_id)
            .map(|index| index as u32)
            .ok_or_else(|| EngineError::inconsistent(group_id, "next recipient left the rotation"))?;
        let next_member = ordered[new_position as usize].clone();

        let n = ordered.len();
        let mut group = base.clone();
        group.current_rotation_position = new_position;
        group.total_rotations_completed = step.completed_rotations;
        group.updated_at = self.ctx.clock.now();

        let cycle_complete = n < 2 || group.is_cycle_complete(n);
        if cycle_complete {
            group.status = GroupStatus::Closed;
        }

        if !self
            .ctx
            .repo
            .update_group_cursor(&group, base.current_rotation_position, previous_total)
            .await?
            .is_applied()
        {
            return Err(EngineError::concurrency(format!(
                "group {} cursor moved during advancement",
                group_id
            )));
        }

        info!(
            group_id = %group_id,
            from = previous_position,
            to = new_position,
            completed_rotations = group.total_rotations_completed,
            departed = leaving.len(),
            "Rotation advanced"
        );
        events.push(EngineEvent::RotationAdvanced {
            group_id,
            previous_position,
            new_position,
            next_recipient: next_member.id,
            completed_rotations: group.total_rotations_completed,
        });

        if !cycle_complete {
            let mut snapshot = self.snapshot(group_id).await?;
            if next_member.has_received_payout {
                events.push(EngineEvent::PayoutDue {
                    group_id,
                    member_id: next_member.id,
                    amount: group.payout_amount(n),
                });
            } else {
                self.ensure_recipient_locked_in(&mut snapshot, &mut events).await?;
            }
            self.cover_suspended_shares(&mut snapshot, &mut events).await?;
        }

        let unlocked_members = if cycle_complete {
            let members = self.ctx.repo.members_of(group_id).await?;
            let (unlocked, unlock_events) = self.lockin.unlock_held(&group, &members).await?;
            events.extend(unlock_events);
            info!(group_id = %group_id, "Cycle complete; group closed");
            unlocked
        } else {
            Vec::new()
        };

        let outcome = AdvanceOutcome {
            group_id,
            previous_position,
            new_position,
            next_recipient: rotation::recipient_info(&next_member),
            completed_rotations: group.total_rotations_completed,
            wrapped_to_start: step.wrapped,
            is_cycle_complete: cycle_complete,
            unlocked_members,
            departed_members: leaving.iter().map(|m| m.id).collect(),
        };
        Ok((outcome, events))
    }
}

/// A suspended member leaving with every share of their pass covered.
fn release_suspended(member: &Member) -> Member {
    let mut released = member.clone();
    released.rotation_position = OUT_OF_ROTATION;
    released.is_locked_in = false;
    released.security_deposit_status = DepositStatus::Returned;
    released
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_count() {
        let done = CompletionCount {
            confirmed: 3,
            expected: 3,
        };
        assert!(done.is_complete());
        assert_eq!(done.pending(), 0);

        let partial = CompletionCount {
            confirmed: 1,
            expected: 3,
        };
        assert!(!partial.is_complete());
        assert_eq!(partial.pending(), 2);
    }
}
