//! # Membership Tests
//!
//! Group creation, joins with deposit sizing, deposit confirmation and
//! departures.

mod common;

use common::Harness;
use rust_decimal_macros::dec;
use sc_settlement_engine::{
    DepositStatus, EngineEvent, ErrorKind, MemberId, MemberStatus, NewGroup, RotationFrequency,
    SettlementApi,
};

fn new_group(limit: u32) -> NewGroup {
    NewGroup {
        contribution_amount: dec!(1000),
        rotation_frequency: RotationFrequency::Monthly,
        member_limit: limit,
        security_deposit_multiplier: dec!(1),
    }
}

// =============================================================================
// GROUP CREATION
// =============================================================================

#[tokio::test]
async fn test_create_group_validates_terms() {
    let h = Harness::new();

    let mut bad = new_group(4);
    bad.contribution_amount = dec!(0);
    assert_eq!(h.engine.create_group(bad).await.unwrap_err().kind(), ErrorKind::Validation);

    assert_eq!(
        h.engine.create_group(new_group(1)).await.unwrap_err().kind(),
        ErrorKind::Validation
    );

    let mut bad = new_group(4);
    bad.security_deposit_multiplier = dec!(0.5);
    assert_eq!(h.engine.create_group(bad).await.unwrap_err().kind(), ErrorKind::Validation);

    let group = h.engine.create_group(new_group(4)).await.unwrap();
    assert_eq!(group.current_rotation_position, 0);
    assert_eq!(group.total_rotations_completed, 0);
    assert_eq!(h.engine.get_group(group.id).await.unwrap(), group);
}

// =============================================================================
// JOINING
// =============================================================================

#[tokio::test]
async fn test_join_sizes_deposits_for_new_count() {
    let h = Harness::new();
    let group = h.engine.create_group(new_group(5)).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.engine.join_group(group.id, None, None).await.unwrap().member.id);
    }
    for id in &ids {
        h.engine.confirm_security_deposit(*id).await.unwrap();
    }
    assert_eq!(h.member(group.id, ids[0]).await.security_deposit_amount, dec!(2000));

    let joined = h.engine.join_group(group.id, None, None).await.unwrap();
    assert_eq!(joined.member.rotation_position, 4);
    assert_eq!(joined.deposit.deposit_amount, dec!(0));
    assert_eq!(joined.deposit.total_members, 4);

    // The first member's requirement grew; the top-up is owed again.
    let first = h.member(group.id, ids[0]).await;
    assert_eq!(first.security_deposit_amount, dec!(3000));
    assert_eq!(first.security_deposit_status, DepositStatus::Pending);
    let second = h.member(group.id, ids[1]).await;
    assert_eq!(second.security_deposit_amount, dec!(2000));
    assert_eq!(second.security_deposit_status, DepositStatus::Pending);
    let third = h.member(group.id, ids[2]).await;
    assert_eq!(third.security_deposit_amount, dec!(1000));

    assert!(h.engine.validate_no_loss_guarantee(group.id).await.unwrap());
}

#[tokio::test]
async fn test_join_at_preferred_position_shifts_later_members() {
    let h = Harness::new();
    let group = h.engine.create_group(new_group(5)).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.engine.join_group(group.id, None, None).await.unwrap().member.id);
    }

    let chosen = MemberId::new();
    let joined = h
        .engine
        .join_group(group.id, Some(chosen), Some(2))
        .await
        .unwrap();
    assert_eq!(joined.member.id, chosen);
    assert_eq!(joined.member.rotation_position, 2);

    let order: Vec<_> = h
        .engine
        .list_members(group.id)
        .await
        .unwrap()
        .iter()
        .map(|m| (m.id, m.rotation_position))
        .collect();
    assert_eq!(order, vec![(ids[0], 1), (chosen, 2), (ids[1], 3), (ids[2], 4)]);
    assert!(h.engine.audit_group(group.id).await.unwrap().is_empty());

    let err = h.engine.join_group(group.id, None, Some(7)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h.engine.join_group(group.id, Some(chosen), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);
}

#[tokio::test]
async fn test_join_rejected_when_full_or_started() {
    let h = Harness::new();
    let (group, _) = h.group(3, dec!(100)).await;
    let err = h.engine.join_group(group.id, None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);

    let h = Harness::new();
    let group = h.engine.create_group(new_group(5)).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(h.engine.join_group(group.id, None, None).await.unwrap().member.id);
    }
    for id in &ids {
        h.engine.confirm_security_deposit(*id).await.unwrap();
    }
    h.engine.start_rotation(group.id).await.unwrap();

    let err = h.engine.join_group(group.id, None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);
}

#[tokio::test]
async fn test_deposit_confirmed_once() {
    let h = Harness::new();
    let group = h.engine.create_group(new_group(3)).await.unwrap();
    let member = h.engine.join_group(group.id, None, None).await.unwrap().member;

    let confirmed = h.engine.confirm_security_deposit(member.id).await.unwrap();
    assert_eq!(confirmed.security_deposit_status, DepositStatus::Confirmed);

    let err = h.engine.confirm_security_deposit(member.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);

    let err = h.engine.confirm_security_deposit(MemberId::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// LEAVING
// =============================================================================

#[tokio::test]
async fn test_leave_before_start_returns_deposit_and_densifies() {
    let h = Harness::new();
    let (group, ids) = h.group(4, dec!(1000)).await;

    let left = h.engine.leave_group(ids[1]).await.unwrap();
    assert_eq!(left.status, MemberStatus::Left);
    assert_eq!(left.rotation_position, 0);
    assert_eq!(left.security_deposit_status, DepositStatus::Returned);

    // The leaver's deposit, then the first member's excess for a group of three.
    let returns: Vec<_> = h
        .events
        .named("deposit_return_due")
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::DepositReturnDue { member_id, amount, .. } => Some((member_id, amount)),
            _ => None,
        })
        .collect();
    assert_eq!(returns, vec![(ids[1], dec!(2000)), (ids[0], dec!(1000))]);

    let active: Vec<_> = h
        .engine
        .list_members(group.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.is_active())
        .map(|m| (m.id, m.rotation_position, m.security_deposit_amount))
        .collect();
    assert_eq!(
        active,
        vec![
            (ids[0], 1, dec!(2000)),
            (ids[2], 2, dec!(1000)),
            (ids[3], 3, dec!(0)),
        ]
    );

    let report = h.engine.analyze_deposit_sufficiency(group.id).await.unwrap();
    assert!(report.is_sufficient);
    assert_eq!(report.members.len(), 3);

    let err = h.engine.leave_group(ids[1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);
}

#[tokio::test]
async fn test_leave_requires_confirmed_deposit() {
    let h = Harness::new();
    let group = h.engine.create_group(new_group(3)).await.unwrap();
    let member = h.engine.join_group(group.id, None, None).await.unwrap().member;

    let eligibility = h.engine.validate_departure_eligibility(member.id).await.unwrap();
    assert!(!eligibility.eligible);
    let err = h.engine.leave_group(member.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessLogic);
}
