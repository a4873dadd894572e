//! # Security Deposit Calculator
//!
//! Pure, stateless deposit arithmetic.
//!
//! A member at 1-based position `p` in a group of `N` members receives the
//! pot at turn `p` and still owes `N - p` contributions afterwards. If they
//! disappear right after collecting, the group loses at most
//! `contribution × (N - p)`. The deposit scales that by the group multiplier
//! (≥ 1) and rounds up to the currency minor unit, so it always dominates the
//! worst-case loss.
//!
//! ```text
//! contribution = 1000, N = 5, multiplier = 1.0
//!
//! position   1      2      3      4      5
//! deposit  4000   3000   2000   1000     0
//! ```

use rust_decimal::{Decimal, RoundingStrategy};

use super::entities::{Group, Member};
use super::errors::{EngineError, EngineResult};
use super::outcomes::{DepositBreakdown, MemberCoverage, SufficiencyReport};
use super::rotation::{outstanding_covers, rotation_order};

/// Decimal places of the currency minor unit.
pub const CURRENCY_SCALE: u32 = 2;

fn check_position(position: u32, total_members: u32) -> EngineResult<()> {
    if position < 1 || position > total_members {
        return Err(EngineError::validation("invalid position"));
    }
    Ok(())
}

/// Round up to the currency minor unit.
pub fn round_up_to_minor_unit(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::ToPositiveInfinity)
}

/// Required deposit for `position` in a group of `total_members`.
///
/// # Errors
///
/// - `Validation("invalid position")` if `position ∉ [1, total_members]`
/// - `Validation` if `multiplier < 1` or the contribution is not positive
pub fn calculate_deposit(
    contribution_amount: Decimal,
    position: u32,
    total_members: u32,
    multiplier: Decimal,
) -> EngineResult<Decimal> {
    check_position(position, total_members)?;
    if contribution_amount <= Decimal::ZERO {
        return Err(EngineError::validation("contribution amount must be positive"));
    }
    if multiplier < Decimal::ONE {
        return Err(EngineError::validation(
            "security deposit multiplier must be at least 1.0",
        ));
    }

    let remaining = Decimal::from(total_members - position);
    Ok(round_up_to_minor_unit(
        contribution_amount * remaining * multiplier,
    ))
}

/// Worst-case loss the rest of the group faces if `position` defaults right
/// after being paid. Multiplier-independent.
pub fn calculate_maximum_loss(
    contribution_amount: Decimal,
    position: u32,
    total_members: u32,
) -> EngineResult<Decimal> {
    check_position(position, total_members)?;
    Ok(contribution_amount * Decimal::from(total_members - position))
}

/// Full derivation of a deposit, for display at join time.
pub fn breakdown(
    contribution_amount: Decimal,
    position: u32,
    total_members: u32,
    multiplier: Decimal,
) -> EngineResult<DepositBreakdown> {
    let deposit_amount = calculate_deposit(contribution_amount, position, total_members, multiplier)?;
    let max_potential_loss = calculate_maximum_loss(contribution_amount, position, total_members)?;
    Ok(DepositBreakdown {
        contribution_amount,
        multiplier,
        position,
        total_members,
        remaining_members_after_position: total_members - position,
        max_potential_loss,
        deposit_amount,
    })
}

/// Deposit a defaulted member must hold again to be back in good standing:
/// the requirement of the slot they held when they defaulted.
///
/// Members without a default record are measured against their current slot
/// in a rotation of `rotation_len`.
pub fn required_after_default(group: &Group, member: &Member, rotation_len: u32) -> EngineResult<Decimal> {
    let (position, total) = match member.default_record {
        Some(record) => (record.position, record.total_members),
        None => (member.rotation_position, rotation_len),
    };
    calculate_deposit(
        group.contribution_amount,
        position,
        total,
        group.security_deposit_multiplier,
    )
}

/// `(required_deposit, max_potential_loss)` for the member at `index` of the
/// rotation order. A suspended member is exposed only for the shares they
/// still owe in the current pass.
pub fn exposure(group: &Group, ordered: &[Member], index: usize) -> EngineResult<(Decimal, Decimal)> {
    let member = &ordered[index];
    let total = ordered.len() as u32;
    if member.is_suspended() {
        let owed = outstanding_covers(group, ordered.len(), index);
        let max_loss = group.contribution_amount * Decimal::from(owed);
        return Ok((round_up_to_minor_unit(max_loss), max_loss));
    }
    let position = member.rotation_position;
    Ok((
        calculate_deposit(
            group.contribution_amount,
            position,
            total,
            group.security_deposit_multiplier,
        )?,
        calculate_maximum_loss(group.contribution_amount, position, total)?,
    ))
}

/// Every member in the rotation holds a deposit covering their maximum
/// possible loss.
///
/// Audit pass only; it is not enforced transactionally. A member whose
/// position is outside `1..=N` fails the guarantee.
pub fn validate_no_loss_guarantee(group: &Group, members: &[Member]) -> bool {
    let ordered = rotation_order(members);
    (0..ordered.len()).all(|index| match exposure(group, &ordered, index) {
        Ok((_, max_loss)) => ordered[index].security_deposit_amount >= max_loss,
        Err(_) => false,
    })
}

/// Per-member coverage analysis of the rotation.
pub fn analyze_sufficiency(group: &Group, members: &[Member]) -> EngineResult<SufficiencyReport> {
    let ordered = rotation_order(members);

    let mut total_coverage = Decimal::ZERO;
    let mut potential_shortfall = Decimal::ZERO;
    let mut lines = Vec::with_capacity(ordered.len());

    for (index, member) in ordered.iter().enumerate() {
        let (required_deposit, max_potential_loss) = exposure(group, &ordered, index)?;
        let coverage_gap = (max_potential_loss - member.security_deposit_amount).max(Decimal::ZERO);

        total_coverage += member.security_deposit_amount;
        potential_shortfall += coverage_gap;
        lines.push(MemberCoverage {
            member_id: member.id,
            position: member.rotation_position,
            deposit_amount: member.security_deposit_amount,
            required_deposit,
            max_potential_loss,
            coverage_gap,
        });
    }

    Ok(SufficiencyReport {
        is_sufficient: potential_shortfall.is_zero(),
        total_coverage,
        potential_shortfall,
        members: lines,
    })
}
