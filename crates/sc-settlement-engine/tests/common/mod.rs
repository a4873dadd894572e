//! Shared fixtures for the settlement engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sc_settlement_engine::{
    ConfirmationSide, EngineConfig, EventPublisher, Group, GroupId, InMemoryRecordStore,
    ManualClock, Member, MemberId, NewGroup, NewTransaction, RecordStore, RecordingPublisher,
    RotationFrequency, SettlementApi, SettlementEngine, TransactionId, TransactionType,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub struct Harness {
    pub engine: Arc<SettlementEngine>,
    pub store: Arc<dyn RecordStore>,
    pub events: Arc<RecordingPublisher>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryRecordStore::new()))
    }

    pub fn with_store(store: Arc<dyn RecordStore>) -> Self {
        let events = Arc::new(RecordingPublisher::new());
        Self::with_parts(store, events.clone(), events)
    }

    pub fn with_parts(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        events: Arc<RecordingPublisher>,
    ) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = SettlementEngine::new(
            Arc::clone(&store),
            publisher,
            clock.clone(),
            EngineConfig::default(),
        )
        .unwrap();
        Self {
            engine: Arc::new(engine),
            store,
            events,
            clock,
        }
    }

    /// Group of `size` members with confirmed deposits, not yet started.
    pub async fn group(&self, size: u32, contribution: Decimal) -> (Group, Vec<MemberId>) {
        let group = self
            .engine
            .create_group(NewGroup {
                contribution_amount: contribution,
                rotation_frequency: RotationFrequency::Weekly,
                member_limit: size,
                security_deposit_multiplier: dec!(1),
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..size {
            let joined = self.engine.join_group(group.id, None, None).await.unwrap();
            ids.push(joined.member.id);
        }
        for id in &ids {
            self.engine.confirm_security_deposit(*id).await.unwrap();
        }
        (group, ids)
    }

    /// Started group: the first recipient is locked in.
    pub async fn started_group(&self, size: u32, contribution: Decimal) -> (Group, Vec<MemberId>) {
        let (group, ids) = self.group(size, contribution).await;
        self.engine.start_rotation(group.id).await.unwrap();
        (group, ids)
    }

    pub async fn member(&self, group_id: GroupId, member_id: MemberId) -> Member {
        self.engine
            .list_members(group_id)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == member_id)
            .unwrap()
    }

    pub async fn contribute(&self, group_id: GroupId, from: MemberId, to: MemberId) -> TransactionId {
        let group = self.engine.get_group(group_id).await.unwrap();
        self.engine
            .create_transaction(NewTransaction {
                group_id,
                from_member: from,
                to_member: to,
                amount: group.contribution_amount,
                transaction_type: TransactionType::Contribution,
                note: None,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn confirm_both(&self, tx: TransactionId, from: MemberId, to: MemberId) {
        self.engine
            .confirm_transaction(tx, from, ConfirmationSide::Sender)
            .await
            .unwrap();
        self.engine
            .confirm_transaction(tx, to, ConfirmationSide::Recipient)
            .await
            .unwrap();
    }

    /// Every active non-recipient pays the current recipient, except `skip`.
    pub async fn pay_round_except(&self, group_id: GroupId, skip: &[MemberId]) {
        let recipient = self.engine.get_current_rotation(group_id).await.unwrap().member_id;
        let members = self.engine.list_members(group_id).await.unwrap();
        for member in members
            .iter()
            .filter(|m| m.is_active() && m.id != recipient && !skip.contains(&m.id))
        {
            let tx = self.contribute(group_id, member.id, recipient).await;
            self.confirm_both(tx, member.id, recipient).await;
        }
    }

    pub async fn pay_round(&self, group_id: GroupId) {
        self.pay_round_except(group_id, &[]).await
    }
}
