//! # Confirmation Service
//!
//! Creates transfer records and applies dual-party confirmations.
//!
//! Confirmations take no lease. Each one is a compare-and-swap on the
//! `confirmation_status` that was read, retried on conflict. Two sides landing
//! at once both commit, and whichever commits second observes the first and
//! performs the single transition to `both_confirmed`.
//!
//! Reaching `both_confirmed` on a contribution enqueues an advancement check
//! as an event rather than advancing inline, so this call never waits on the
//! group's `rotation_advance` lease.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::EngineContext;
use crate::domain::confirmation::{apply_confirmation, confirmed_at, party_for};
use crate::domain::rotation;
use crate::domain::{
    ConfirmationOutcome, ConfirmationSide, ConfirmationStatus, Contribution, EngineError,
    EngineResult, MemberId, TransactionId, TransactionType,
};
use crate::events::EngineEvent;
use crate::ports::inbound::NewTransaction;

#[derive(Clone)]
pub struct ConfirmationService {
    ctx: Arc<EngineContext>,
}

impl ConfirmationService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Record a new pending transfer between two active members.
    ///
    /// # Errors
    /// - `Validation`: non-positive amount, self-transfer, wrong contribution
    ///   amount, or a direct `default_cover` request
    /// - `BusinessLogic`: closed group, inactive or foreign member, recipient
    ///   not current, or a repeated contribution in the same pass
    pub async fn create_transaction(&self, request: NewTransaction) -> EngineResult<Contribution> {
        if request.amount <= Decimal::ZERO {
            return Err(EngineError::validation("amount must be positive"));
        }
        if request.from_member == request.to_member {
            return Err(EngineError::validation("sender and recipient must differ"));
        }
        if request.transaction_type == TransactionType::DefaultCover {
            return Err(EngineError::validation(
                "default covers are recorded by default handling only",
            ));
        }

        let group = self.ctx.repo.group(request.group_id).await?;
        if group.is_closed() {
            return Err(EngineError::business("group is closed"));
        }

        for id in [request.from_member, request.to_member] {
            let member = self.ctx.repo.member(id).await?;
            if member.group_id != group.id {
                return Err(EngineError::business(format!(
                    "member {} does not belong to group {}",
                    id, group.id
                )));
            }
            if !member.is_active() {
                return Err(EngineError::business(format!("member {} is not active", id)));
            }
        }

        if request.transaction_type == TransactionType::Contribution {
            if request.amount != group.contribution_amount {
                return Err(EngineError::validation(format!(
                    "contribution must be exactly {}",
                    group.contribution_amount
                )));
            }

            let members = self.ctx.repo.members_of(group.id).await?;
            let ordered = rotation::rotation_order(&members);
            let recipient = rotation::current_recipient(&group, &ordered)
                .ok_or_else(|| EngineError::inconsistent(group.id, "no current recipient"))?;
            if recipient.id != request.to_member {
                return Err(EngineError::business(format!(
                    "member {} is not the current recipient",
                    request.to_member
                )));
            }

            // Advisory: completion counts distinct senders, so a duplicate
            // that slips past this check cannot be counted twice.
            let already_sent = self
                .ctx
                .repo
                .transactions_to(group.id, request.to_member)
                .await?
                .iter()
                .any(|tx| {
                    tx.from_member == request.from_member
                        && tx.transaction_type.settles_rotation_share()
                        && tx.cycle == group.total_rotations_completed
                });
            if already_sent {
                return Err(EngineError::business(format!(
                    "member {} already contributed to this rotation",
                    request.from_member
                )));
            }
        }

        let tx = Contribution {
            id: TransactionId::new(),
            group_id: group.id,
            from_member: request.from_member,
            to_member: request.to_member,
            amount: request.amount,
            transaction_type: request.transaction_type,
            confirmation_status: ConfirmationStatus::Pending,
            sender_confirmed_at: None,
            recipient_confirmed_at: None,
            cycle: group.total_rotations_completed,
            note: request.note,
            created_at: self.ctx.clock.now(),
        };
        self.ctx.repo.insert_transaction(&tx).await?;

        debug!(
            group_id = %tx.group_id,
            transaction_id = %tx.id,
            from = %tx.from_member,
            to = %tx.to_member,
            amount = %tx.amount,
            "Transaction created"
        );
        self.ctx.publish(vec![EngineEvent::TransactionCreated {
            group_id: tx.group_id,
            transaction_id: tx.id,
            from_member: tx.from_member,
            to_member: tx.to_member,
            amount: tx.amount,
            transaction_type: tx.transaction_type,
        }]);
        Ok(tx)
    }

    /// Confirm one side of a transfer.
    ///
    /// # Errors
    /// - `Authorization`: `member_id` is not the party for `side`
    /// - `DuplicateConfirmation`: `side` already confirmed
    /// - `Concurrency`: the record kept changing underneath for
    ///   `confirm_max_retries` attempts
    pub async fn confirm(
        &self,
        transaction_id: TransactionId,
        member_id: MemberId,
        side: ConfirmationSide,
    ) -> EngineResult<ConfirmationOutcome> {
        let attempts = self.ctx.config.confirm_max_retries.max(1);

        for attempt in 1..=attempts {
            let tx = self.ctx.repo.transaction(transaction_id).await?;
            let updated = apply_confirmation(&tx, side, member_id, self.ctx.clock.now())?;

            let written = self
                .ctx
                .repo
                .update_transaction_if_status(&updated, tx.confirmation_status)
                .await?;
            if !written.is_applied() {
                debug!(
                    transaction_id = %transaction_id,
                    side = %side,
                    attempt,
                    "Confirmation raced another write; retrying"
                );
                continue;
            }

            let completed_now = updated.is_both_confirmed();
            let mut advancement_check_enqueued = false;

            self.ctx.publish(vec![EngineEvent::TransactionConfirmed {
                group_id: updated.group_id,
                transaction_id,
                side,
                status: updated.confirmation_status,
            }]);

            if completed_now {
                info!(
                    group_id = %updated.group_id,
                    transaction_id = %transaction_id,
                    "Transaction confirmed by both parties"
                );
                if updated.transaction_type.settles_rotation_share() {
                    let check = EngineEvent::AdvancementCheckRequested {
                        group_id: updated.group_id,
                        recipient_id: updated.to_member,
                    };
                    advancement_check_enqueued = match self.ctx.publisher.publish(check) {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(
                                group_id = %updated.group_id,
                                error = %err,
                                "Advancement check not enqueued"
                            );
                            false
                        }
                    };
                }
            }

            return Ok(ConfirmationOutcome {
                transaction: updated,
                completed_now,
                advancement_check_enqueued,
            });
        }

        Err(EngineError::concurrency(format!(
            "transaction {} kept changing during confirmation",
            transaction_id
        )))
    }

    pub async fn get_transaction(&self, transaction_id: TransactionId) -> EngineResult<Contribution> {
        self.ctx.repo.transaction(transaction_id).await
    }

    /// Transfers on which `member_id` still owes their own side.
    pub async fn pending_confirmations(&self, member_id: MemberId) -> EngineResult<Vec<Contribution>> {
        self.ctx.repo.member(member_id).await?;
        let owed = self
            .ctx
            .repo
            .transactions_involving(member_id)
            .await?
            .into_iter()
            .filter(|tx| {
                [ConfirmationSide::Sender, ConfirmationSide::Recipient]
                    .into_iter()
                    .any(|side| party_for(tx, side) == member_id && confirmed_at(tx, side).is_none())
            })
            .collect();
        Ok(owed)
    }
}
