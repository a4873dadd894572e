//! Consistency audit over a group's stored state.
//!
//! Reports violations; never corrects them. A group with a `Critical` issue
//! should be frozen by the audit collaborator until an operator intervenes.

use std::collections::BTreeMap;

use super::deposit::exposure;
use super::entities::{Contribution, DepositStatus, Group, Member};
use super::outcomes::{ConsistencyIssue, IssueKind, Severity};
use super::rotation::rotation_order;

fn issue(kind: IssueKind, severity: Severity, description: String) -> ConsistencyIssue {
    ConsistencyIssue {
        kind,
        severity,
        description,
    }
}

/// Audit one group. `members` and `transactions` are every stored row of the
/// group, in the rotation or not.
pub fn audit(group: &Group, members: &[Member], transactions: &[Contribution]) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    let ordered = rotation_order(members);
    let n = ordered.len() as u32;

    // Rotation ordering
    let mut by_position: BTreeMap<u32, usize> = BTreeMap::new();
    for member in &ordered {
        *by_position.entry(member.rotation_position).or_default() += 1;
    }
    for (position, count) in &by_position {
        if *count > 1 {
            issues.push(issue(
                IssueKind::DuplicateRotationPosition,
                Severity::Critical,
                format!("{} members share rotation position {}", count, position),
            ));
        }
    }
    let missing: Vec<u32> = (1..=n).filter(|p| !by_position.contains_key(p)).collect();
    if !missing.is_empty() {
        issues.push(issue(
            IssueKind::RotationPositionGap,
            Severity::Critical,
            format!("rotation positions {:?} are unoccupied among 1..={}", missing, n),
        ));
    }
    if n > 0 && group.current_rotation_position >= n {
        issues.push(issue(
            IssueKind::CurrentPositionOutOfRange,
            Severity::Critical,
            format!(
                "current rotation position {} exceeds rotation size {}",
                group.current_rotation_position, n
            ),
        ));
    }
    if n > group.member_limit {
        issues.push(issue(
            IssueKind::MemberLimitExceeded,
            Severity::High,
            format!("{} members in the rotation exceed the limit of {}", n, group.member_limit),
        ));
    }

    // Deposits
    let cycle_complete = group.is_cycle_complete(ordered.len());
    for (index, member) in ordered.iter().enumerate() {
        if let Ok((_, max_loss)) = exposure(group, &ordered, index) {
            if member.security_deposit_amount < max_loss {
                issues.push(issue(
                    IssueKind::InsufficientDeposit,
                    Severity::High,
                    format!(
                        "member {} deposit {} below maximum loss {}",
                        member.id, member.security_deposit_amount, max_loss
                    ),
                ));
            }
        }
        if member.security_deposit_status == DepositStatus::Confirmed
            && member.security_deposit_amount.is_zero()
            && member.rotation_position != n
        {
            issues.push(issue(
                IssueKind::ConfirmedZeroDeposit,
                Severity::Medium,
                format!(
                    "member {} has a confirmed zero deposit at position {}",
                    member.id, member.rotation_position
                ),
            ));
        }
        if member.has_received_payout && !member.is_locked_in && !cycle_complete {
            issues.push(issue(
                IssueKind::PaidOutMemberNotLockedIn,
                Severity::Critical,
                format!("member {} was paid out but is not locked in", member.id),
            ));
        }
    }

    // Transactions
    for tx in transactions.iter().filter(|t| t.is_both_confirmed()) {
        if tx.sender_confirmed_at.is_none() || tx.recipient_confirmed_at.is_none() {
            issues.push(issue(
                IssueKind::MissingConfirmationTimestamp,
                Severity::High,
                format!("transaction {} is both_confirmed but missing a timestamp", tx.id),
            ));
        }
    }

    issues
}
