//! # Application Layer
//!
//! Stateful services orchestrating the domain over the outbound ports.
//!
//! | Service | Owns |
//! |---------|------|
//! | `LockManager` | lease rows |
//! | `MembershipService` | group creation, joins, departures, deposit confirmation |
//! | `ConfirmationService` | transaction rows |
//! | `RotationService` | the group cursor |
//! | `LockInService` | `is_locked_in`, `has_received_payout`, deposit lock/return |
//! | `DefaultHandler` | default covers, member suspension, deposit replenishment |
//!
//! Every group-wide write happens under a lease. Leases are always taken in
//! the order `default_handling`, `rotation_advance`, `member_join`.

pub mod confirmation;
pub mod defaults;
pub mod lock_manager;
pub mod lockin;
pub mod membership;
pub mod repository;
pub mod roster;
pub mod rotation;
pub mod service;
pub mod worker;

use std::sync::Arc;
use tracing::warn;

use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::ports::outbound::{EventPublisher, RecordStore, TimeSource};

pub use confirmation::ConfirmationService;
pub use defaults::DefaultHandler;
pub use lock_manager::LockManager;
pub use lockin::LockInService;
pub use membership::MembershipService;
pub use repository::Repository;
pub use rotation::RotationService;
pub use service::SettlementEngine;
pub use worker::AdvancementWorker;

/// Collaborators shared by every service.
pub struct EngineContext {
    pub repo: Repository,
    pub locks: Arc<LockManager>,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn TimeSource>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn TimeSource>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(LockManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.lock_ttl(),
        ));
        Self {
            repo: Repository::new(store),
            locks,
            publisher,
            clock,
            config,
        }
    }

    /// Publish events produced by a committed mutation. Failures are logged;
    /// the mutation itself has already succeeded.
    pub fn publish(&self, events: Vec<EngineEvent>) {
        for event in events {
            let name = event.name();
            let group_id = event.group_id();
            if let Err(err) = self.publisher.publish(event) {
                warn!(event = name, group_id = %group_id, error = %err, "Event publish failed");
            }
        }
    }
}
