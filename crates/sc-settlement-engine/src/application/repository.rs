//! Typed access to the record store.
//!
//! Encodes domain records as JSON rows and back. Nothing here is cached: every
//! read goes to the store so state is always re-derived after a failure.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::domain::{
    ConfirmationStatus, Contribution, EngineError, EngineResult, Group, GroupId, Member, MemberId,
    TransactionId,
};
use crate::ports::outbound::{Collection, Filter, Precondition, RecordStore, Row, WriteOutcome};

fn encode<T: Serialize>(record: &T) -> EngineResult<Row> {
    serde_json::to_value(record).map_err(|e| EngineError::Store(format!("row encoding failed: {}", e)))
}

fn decode<T: DeserializeOwned>(row: Row) -> EngineResult<T> {
    serde_json::from_value(row).map_err(|e| EngineError::Store(format!("row decoding failed: {}", e)))
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> EngineResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    // =========================================================================
    // GROUPS
    // =========================================================================

    pub async fn insert_group(&self, group: &Group) -> EngineResult<()> {
        self.store
            .insert(Collection::Group, &group.id.to_string(), encode(group)?)
            .await?;
        Ok(())
    }

    pub async fn group(&self, id: GroupId) -> EngineResult<Group> {
        match self.store.get(Collection::Group, &id.to_string()).await? {
            Some(row) => decode(row),
            None => Err(EngineError::group_not_found(id)),
        }
    }

    /// Replace the group row only if its rotation cursor is still
    /// `(expected_position, expected_total)`.
    pub async fn update_group_cursor(
        &self,
        group: &Group,
        expected_position: u32,
        expected_total: u64,
    ) -> EngineResult<WriteOutcome> {
        let guard = Precondition::AllOf(vec![
            Precondition::field_equals("current_rotation_position", expected_position),
            Precondition::field_equals("total_rotations_completed", expected_total),
        ]);
        Ok(self
            .store
            .update(Collection::Group, &group.id.to_string(), encode(group)?, guard)
            .await?)
    }

    // =========================================================================
    // MEMBERS
    // =========================================================================

    pub async fn insert_member(&self, member: &Member) -> EngineResult<()> {
        self.store
            .insert(Collection::Member, &member.id.to_string(), encode(member)?)
            .await?;
        Ok(())
    }

    pub async fn find_member(&self, id: MemberId) -> EngineResult<Option<Member>> {
        match self.store.get(Collection::Member, &id.to_string()).await? {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }

    pub async fn member(&self, id: MemberId) -> EngineResult<Member> {
        self.find_member(id)
            .await?
            .ok_or_else(|| EngineError::member_not_found(id))
    }

    /// Every member row of a group, any status, ordered by rotation position.
    pub async fn members_of(&self, group_id: GroupId) -> EngineResult<Vec<Member>> {
        let rows = self
            .store
            .select(Collection::Member, &Filter::new().eq("group_id", group_id))
            .await?;
        let mut members: Vec<Member> = decode_all(rows)?;
        members.sort_by_key(|m| (m.rotation_position, m.joined_at));
        Ok(members)
    }

    /// Unconditional replace. Callers hold the lease that owns member writes.
    pub async fn save_member(&self, member: &Member) -> EngineResult<()> {
        let outcome = self
            .store
            .update(
                Collection::Member,
                &member.id.to_string(),
                encode(member)?,
                Precondition::Always,
            )
            .await?;
        if !outcome.is_applied() {
            return Err(EngineError::member_not_found(member.id));
        }
        Ok(())
    }

    /// Replace a member row only if `precondition` holds for the stored row.
    pub async fn update_member_if(
        &self,
        member: &Member,
        precondition: Precondition,
    ) -> EngineResult<WriteOutcome> {
        Ok(self
            .store
            .update(
                Collection::Member,
                &member.id.to_string(),
                encode(member)?,
                precondition,
            )
            .await?)
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    pub async fn insert_transaction(&self, tx: &Contribution) -> EngineResult<()> {
        self.store
            .insert(Collection::Transaction, &tx.id.to_string(), encode(tx)?)
            .await?;
        Ok(())
    }

    pub async fn transaction(&self, id: TransactionId) -> EngineResult<Contribution> {
        match self.store.get(Collection::Transaction, &id.to_string()).await? {
            Some(row) => decode(row),
            None => Err(EngineError::transaction_not_found(id)),
        }
    }

    pub async fn transactions_of(&self, group_id: GroupId) -> EngineResult<Vec<Contribution>> {
        let rows = self
            .store
            .select(Collection::Transaction, &Filter::new().eq("group_id", group_id))
            .await?;
        decode_all(rows)
    }

    /// Transfers of a group addressed to `recipient`.
    pub async fn transactions_to(
        &self,
        group_id: GroupId,
        recipient: MemberId,
    ) -> EngineResult<Vec<Contribution>> {
        let filter = Filter::new().eq("group_id", group_id).eq("to_member", recipient);
        let rows = self.store.select(Collection::Transaction, &filter).await?;
        decode_all(rows)
    }

    /// Transfers where `member` is either party.
    pub async fn transactions_involving(&self, member: MemberId) -> EngineResult<Vec<Contribution>> {
        let sent = self
            .store
            .select(Collection::Transaction, &Filter::new().eq("from_member", member))
            .await?;
        let received = self
            .store
            .select(Collection::Transaction, &Filter::new().eq("to_member", member))
            .await?;
        let mut all: Vec<Contribution> = decode_all(sent)?;
        all.extend(decode_all::<Contribution>(received)?);
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }

    /// Compare-and-swap on the confirmation status the caller read.
    pub async fn update_transaction_if_status(
        &self,
        tx: &Contribution,
        expected: ConfirmationStatus,
    ) -> EngineResult<WriteOutcome> {
        Ok(self
            .store
            .update(
                Collection::Transaction,
                &tx.id.to_string(),
                encode(tx)?,
                Precondition::field_equals("confirmation_status", expected),
            )
            .await?)
    }
}
