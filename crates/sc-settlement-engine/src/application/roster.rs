//! Rotation roster changes shared by departures, defaults and advancement.
//!
//! Callers hold the group's `member_join` lease (and `rotation_advance` when
//! the cursor may move).

use tracing::{debug, info};

use super::EngineContext;
use crate::domain::deposit::calculate_deposit;
use crate::domain::rotation;
use crate::domain::{DepositStatus, EngineError, EngineResult, Group, Member, MemberId};
use crate::events::EngineEvent;

/// Resize deposits for a rotation of `total` slots and persist the ones that
/// changed.
///
/// A confirmed deposit that must grow goes back to `pending` until the member
/// tops it up. A held deposit that shrinks has its excess returned. Spent
/// deposits are left alone.
pub(crate) async fn resize_deposits(
    ctx: &EngineContext,
    group: &Group,
    ordered: &mut [Member],
    total: u32,
) -> EngineResult<Vec<EngineEvent>> {
    let mut events = Vec::new();
    for member in ordered.iter_mut() {
        if member.security_deposit_status == DepositStatus::Used {
            continue;
        }
        let required = calculate_deposit(
            group.contribution_amount,
            member.rotation_position,
            total,
            group.security_deposit_multiplier,
        )?;
        if required == member.security_deposit_amount {
            continue;
        }

        if required > member.security_deposit_amount {
            if member.security_deposit_status == DepositStatus::Confirmed {
                member.security_deposit_status = DepositStatus::Pending;
            }
        } else if matches!(
            member.security_deposit_status,
            DepositStatus::Confirmed | DepositStatus::Locked
        ) {
            let excess = member.security_deposit_amount - required;
            debug!(member_id = %member.id, excess = %excess, "Deposit requirement shrank");
            events.push(EngineEvent::DepositReturnDue {
                group_id: group.id,
                member_id: member.id,
                amount: excess,
            });
        }
        member.security_deposit_amount = required;
        ctx.repo.save_member(member).await?;
    }
    Ok(events)
}

/// Members left in the rotation after a withdrawal, and the group with its
/// cursor still on the same recipient.
pub(crate) struct Withdrawal {
    pub group: Group,
    pub remaining: Vec<Member>,
    pub events: Vec<EngineEvent>,
}

/// Take `leaving` out of the rotation.
///
/// `leaving` rows are saved as given, so the caller has already moved them to
/// `OUT_OF_ROTATION`. The rest are re-densified and their deposits resized.
/// The cursor drops by one for every slot removed ahead of it.
///
/// # Errors
/// - `Concurrency`: the cursor moved under us
pub(crate) async fn withdraw(
    ctx: &EngineContext,
    group: &Group,
    ordered: &[Member],
    leaving: &[Member],
) -> EngineResult<Withdrawal> {
    let is_leaving = |id: MemberId| leaving.iter().any(|m| m.id == id);
    for member in leaving {
        ctx.repo.save_member(member).await?;
    }

    let ahead = ordered
        .iter()
        .take(group.current_rotation_position as usize)
        .filter(|m| is_leaving(m.id))
        .count() as u32;
    let mut remaining: Vec<Member> = ordered.iter().filter(|m| !is_leaving(m.id)).cloned().collect();
    for index in rotation::redensify(&mut remaining) {
        ctx.repo.save_member(&remaining[index]).await?;
    }
    let total = remaining.len() as u32;
    let events = resize_deposits(ctx, group, &mut remaining, total).await?;

    let mut cursor = group.current_rotation_position - ahead;
    if cursor >= total {
        cursor = 0;
    }

    let mut moved = group.clone();
    if cursor != group.current_rotation_position {
        moved.current_rotation_position = cursor;
        moved.updated_at = ctx.clock.now();
        let written = ctx
            .repo
            .update_group_cursor(&moved, group.current_rotation_position, group.total_rotations_completed)
            .await?;
        if !written.is_applied() {
            return Err(EngineError::concurrency(format!(
                "group {} cursor moved while members were leaving the rotation",
                group.id
            )));
        }
    }

    info!(
        group_id = %group.id,
        left = leaving.len(),
        remaining = remaining.len(),
        cursor,
        "Rotation roster updated"
    );
    Ok(Withdrawal {
        group: moved,
        remaining,
        events,
    })
}
