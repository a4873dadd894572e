//! Rotation arithmetic over the ordered list of members holding a slot.
//!
//! The group stores a 0-based cursor (`current_rotation_position`) into the
//! members in the rotation ordered by their 1-based `rotation_position`.
//! Active members and suspended defaulters both hold slots. Everything here
//! is pure; the stateful controller lives in `application::rotation`.
//!
//! ## Suspended members
//!
//! A member who defaults after collecting the pot stays in the rotation so
//! the remaining recipients of the pass still get a full pot: each of their
//! shares is covered from the deposit. They leave the rotation when the
//! cursor reaches their slot (they never receive twice) or when the pass they
//! defaulted in ends, whichever comes first.

use super::entities::{Group, Member};
use super::errors::{EngineError, EngineResult};
use super::outcomes::{RecipientInfo, ScheduleEntry, ScheduleStatus};

/// Members holding a rotation slot, sorted by rotation position.
pub fn rotation_order(members: &[Member]) -> Vec<Member> {
    let mut ordered: Vec<Member> = members.iter().filter(|m| m.in_rotation()).cloned().collect();
    ordered.sort_by_key(|m| m.rotation_position);
    ordered
}

/// Slot positions must be exactly `1..=N`, and the cursor must be in range.
///
/// Expects `ordered` as returned by [`rotation_order`].
pub fn check_dense_ordering(group: &Group, ordered: &[Member]) -> EngineResult<()> {
    for (index, member) in ordered.iter().enumerate() {
        let expected = index as u32 + 1;
        if member.rotation_position != expected {
            return Err(EngineError::inconsistent(
                group.id,
                format!(
                    "rotation positions are not a dense 1..{} ordering: member {} holds {} where {} was expected",
                    ordered.len(),
                    member.id,
                    member.rotation_position,
                    expected
                ),
            ));
        }
    }

    if !ordered.is_empty() && group.current_rotation_position as usize >= ordered.len() {
        return Err(EngineError::inconsistent(
            group.id,
            format!(
                "current rotation position {} outside [0, {}]",
                group.current_rotation_position,
                ordered.len() - 1
            ),
        ));
    }
    Ok(())
}

/// Member whose `rotation_position - 1` equals the group cursor.
pub fn current_recipient<'a>(group: &Group, ordered: &'a [Member]) -> Option<&'a Member> {
    ordered
        .iter()
        .find(|m| m.rotation_position == group.current_rotation_position + 1)
}

pub fn recipient_info(member: &Member) -> RecipientInfo {
    RecipientInfo {
        member_id: member.id,
        rotation_position: member.rotation_position,
        position_in_cycle: member.rotation_position.saturating_sub(1),
    }
}

/// Reassign positions `1..=N` in the existing order. Returns the indices of
/// members whose position changed.
pub fn redensify(ordered: &mut [Member]) -> Vec<usize> {
    let mut changed = Vec::new();
    for (index, member) in ordered.iter_mut().enumerate() {
        let expected = index as u32 + 1;
        if member.rotation_position != expected {
            member.rotation_position = expected;
            changed.push(index);
        }
    }
    changed
}

/// Position for a joining member, given `total_members` already active.
///
/// `None` appends at `N + 1`. A preferred position must lie in `1..=N+1`.
pub fn join_position(total_members: u32, preferred: Option<u32>) -> EngineResult<u32> {
    let append = total_members + 1;
    match preferred {
        None => Ok(append),
        Some(p) if (1..=append).contains(&p) => Ok(p),
        Some(p) => Err(EngineError::validation(format!(
            "preferred position {} outside 1..={}",
            p, append
        ))),
    }
}

/// Someone has been paid, or the cursor has moved.
pub fn rotation_started(group: &Group, members: &[Member]) -> bool {
    group.current_rotation_position > 0
        || group.total_rotations_completed > 0
        || members.iter().any(|m| m.in_rotation() && m.has_received_payout)
}

/// Started and not yet through the full cycle.
pub fn cycle_in_progress(group: &Group, members: &[Member]) -> bool {
    let in_rotation = members.iter().filter(|m| m.in_rotation()).count();
    rotation_started(group, members) && !group.is_cycle_complete(in_rotation)
}

/// Rotation after the suspended members that may not stay have left.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationStep {
    /// Remaining members, not yet re-densified
    pub order: Vec<Member>,
    pub departing: Vec<Member>,
    pub cursor: u32,
    pub completed_rotations: u64,
    pub wrapped: bool,
}

/// Place the cursor at `(cursor, completed_rotations)` and drop suspended
/// members that cannot stay there.
///
/// Removing the member at the cursor slides the next one in; running off the
/// end starts the next pass, which releases every suspended member.
pub fn step_to(ordered: &[Member], cursor: u32, completed_rotations: u64) -> RotationStep {
    let mut order = ordered.to_vec();
    let mut departing = Vec::new();
    let mut cursor = cursor as usize;
    let mut total = completed_rotations;
    let mut wrapped = false;

    loop {
        let mut index = 0;
        while index < order.len() {
            let pass_ended = order[index].is_suspended()
                && order[index].default_record.map_or(true, |r| r.cycle < total);
            if pass_ended {
                departing.push(order.remove(index));
                if index < cursor {
                    cursor -= 1;
                }
            } else {
                index += 1;
            }
        }

        if !order.is_empty() && cursor >= order.len() {
            cursor = 0;
            total += 1;
            wrapped = true;
            continue;
        }
        if order.get(cursor).map_or(false, |m| m.is_suspended()) {
            departing.push(order.remove(cursor));
        } else {
            break;
        }
    }

    RotationStep {
        order,
        departing,
        cursor: cursor as u32,
        completed_rotations: total,
        wrapped,
    }
}

/// Shares a suspended member at `index` still owes in this pass after the
/// current recipient's: one per recipient before their own slot or the end of
/// the pass.
pub fn outstanding_covers(group: &Group, ordered_len: usize, index: usize) -> u32 {
    let cursor = group.current_rotation_position as usize;
    let end = if index > cursor { index } else { ordered_len };
    end.saturating_sub(cursor + 1) as u32
}

/// Full rotation schedule for display.
pub fn build_schedule(group: &Group, ordered: &[Member]) -> Vec<ScheduleEntry> {
    ordered
        .iter()
        .enumerate()
        .map(|(index, member)| {
            let index = index as u32;
            let is_current = index == group.current_rotation_position;
            let is_completed =
                !is_current && (index < group.current_rotation_position || member.has_received_payout);
            let status = if is_current {
                ScheduleStatus::Current
            } else if is_completed {
                ScheduleStatus::Completed
            } else {
                ScheduleStatus::Upcoming
            };
            ScheduleEntry {
                index,
                member_id: member.id,
                rotation_position: member.rotation_position,
                is_current,
                is_completed,
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DefaultRecord, MemberStatus, RotationFrequency};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::MemberId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn setup(positions: &[u32]) -> (Group, Vec<Member>) {
        let group = Group::new(dec!(100), RotationFrequency::Daily, 10, dec!(1), Utc::now());
        let members = positions
            .iter()
            .map(|&p| Member::new(MemberId::new(), group.id, p, dec!(0), Utc::now()))
            .collect();
        (group, members)
    }

    #[test]
    fn test_rotation_order_sorts_and_filters() {
        let (_, mut members) = setup(&[3, 1, 2]);
        members[1].status = MemberStatus::Left;
        let ordered = rotation_order(&members);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].rotation_position, 2);
        assert_eq!(ordered[1].rotation_position, 3);
    }

    #[test]
    fn test_dense_ordering_accepts_permutation() {
        let (group, members) = setup(&[2, 3, 1]);
        let ordered = rotation_order(&members);
        assert!(check_dense_ordering(&group, &ordered).is_ok());
    }

    #[test]
    fn test_dense_ordering_rejects_duplicates_and_gaps() {
        let (group, members) = setup(&[1, 2, 2]);
        let err = check_dense_ordering(&group, &rotation_order(&members)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataConsistency);

        let (group, members) = setup(&[1, 2, 4]);
        assert!(check_dense_ordering(&group, &rotation_order(&members)).is_err());
    }

    #[test]
    fn test_dense_ordering_rejects_cursor_out_of_range() {
        let (mut group, members) = setup(&[1, 2, 3]);
        group.current_rotation_position = 3;
        let err = check_dense_ordering(&group, &rotation_order(&members)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataConsistency);
    }

    #[test]
    fn test_current_recipient() {
        let (mut group, members) = setup(&[1, 2, 3]);
        let ordered = rotation_order(&members);
        group.current_rotation_position = 1;
        let recipient = current_recipient(&group, &ordered).unwrap();
        assert_eq!(recipient.rotation_position, 2);
        assert_eq!(recipient_info(recipient).position_in_cycle, 1);

        group.current_rotation_position = 7;
        assert!(current_recipient(&group, &ordered).is_none());
    }

    #[test]
    fn test_redensify_closes_gap() {
        let (_, members) = setup(&[1, 3, 4]);
        let mut ordered = rotation_order(&members);
        let changed = redensify(&mut ordered);
        assert_eq!(changed, vec![1, 2]);
        let positions: Vec<u32> = ordered.iter().map(|m| m.rotation_position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_join_position() {
        assert_eq!(join_position(3, None).unwrap(), 4);
        assert_eq!(join_position(3, Some(2)).unwrap(), 2);
        assert_eq!(join_position(3, Some(4)).unwrap(), 4);
        assert!(join_position(3, Some(0)).is_err());
        assert!(join_position(3, Some(5)).is_err());
    }

    #[test]
    fn test_cycle_in_progress() {
        let (mut group, mut members) = setup(&[1, 2]);
        assert!(!rotation_started(&group, &members));
        assert!(!cycle_in_progress(&group, &members));

        members[0].has_received_payout = true;
        assert!(cycle_in_progress(&group, &members));

        group.total_rotations_completed = 2;
        assert!(rotation_started(&group, &members));
        assert!(!cycle_in_progress(&group, &members));
    }

    fn suspend(member: &mut Member, cycle: u64) {
        member.status = MemberStatus::Defaulted;
        member.has_received_payout = true;
        member.default_record = Some(DefaultRecord {
            cycle,
            position: member.rotation_position,
            total_members: 4,
        });
    }

    #[test]
    fn test_step_wraps() {
        let (_, members) = setup(&[1, 2, 3]);
        let ordered = rotation_order(&members);
        let step = step_to(&ordered, 1, 0);
        assert_eq!((step.cursor, step.completed_rotations, step.wrapped), (1, 0, false));
        let step = step_to(&ordered, 3, 0);
        assert_eq!((step.cursor, step.completed_rotations, step.wrapped), (0, 1, true));
        assert!(step.departing.is_empty());
    }

    #[test]
    fn test_step_keeps_suspended_member_behind_cursor() {
        let (_, mut members) = setup(&[1, 2, 3, 4]);
        suspend(&mut members[0], 0);
        let ordered = rotation_order(&members);

        let step = step_to(&ordered, 2, 0);
        assert!(step.departing.is_empty());
        assert_eq!(step.order.len(), 4);
        assert_eq!((step.cursor, step.completed_rotations, step.wrapped), (2, 0, false));
    }

    #[test]
    fn test_step_releases_suspended_members_at_wrap() {
        let (_, mut members) = setup(&[1, 2, 3, 4]);
        suspend(&mut members[0], 0);
        let ordered = rotation_order(&members);

        let step = step_to(&ordered, 4, 0);
        assert!(step.wrapped);
        assert_eq!((step.cursor, step.completed_rotations), (0, 1));
        assert_eq!(step.departing.len(), 1);
        assert_eq!(step.departing[0].id, members[0].id);
        assert_eq!(step.order[0].id, members[1].id);
    }

    #[test]
    fn test_step_skips_suspended_slot_at_cursor() {
        let (_, mut members) = setup(&[1, 2, 3, 4]);
        suspend(&mut members[2], 1);
        suspend(&mut members[3], 1);
        let ordered = rotation_order(&members);

        // Both remaining slots belong to suspended members: the pass ends.
        let step = step_to(&ordered, 2, 1);
        assert_eq!(step.departing.len(), 2);
        assert_eq!((step.cursor, step.completed_rotations, step.wrapped), (0, 2, true));
        assert_eq!(step.order.len(), 2);

        suspend(&mut members[3], 1);
        members[2].status = MemberStatus::Active;
        let step = step_to(&rotation_order(&members), 2, 1);
        assert!(step.departing.is_empty());
        assert_eq!(step.cursor, 2);
    }

    #[test]
    fn test_outstanding_covers() {
        let (mut group, _) = setup(&[1, 2, 3, 4]);
        group.current_rotation_position = 1;
        // Slot behind the cursor owes every later recipient of the pass.
        assert_eq!(outstanding_covers(&group, 4, 0), 2);
        // Slot ahead of the cursor owes only the recipients before it.
        assert_eq!(outstanding_covers(&group, 4, 3), 1);
        assert_eq!(outstanding_covers(&group, 4, 2), 0);
    }

    #[test]
    fn test_schedule_marks_current_and_completed() {
        let (mut group, members) = setup(&[1, 2, 3]);
        group.current_rotation_position = 1;
        let schedule = build_schedule(&group, &rotation_order(&members));
        let statuses: Vec<ScheduleStatus> = schedule.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ScheduleStatus::Completed,
                ScheduleStatus::Current,
                ScheduleStatus::Upcoming
            ]
        );
    }
}
