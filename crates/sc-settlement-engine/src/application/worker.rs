//! # Advancement Worker
//!
//! Consumes the engine's event channel and performs the advancement checks
//! that confirmations enqueue, off the confirming caller's path.
//!
//! ```text
//! confirm() ──AdvancementCheckRequested──→ [mpsc] ──→ AdvancementWorker ──→ advance()
//!                                                          │
//!                                                          └──→ downstream publisher
//! ```
//!
//! A `Concurrency` result is expected and quiet: it means the rotation is not
//! complete yet, or another caller already advanced it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::RotationService;
use crate::domain::{ErrorKind, GroupId};
use crate::events::EngineEvent;
use crate::ports::outbound::EventPublisher;

pub struct AdvancementWorker {
    rotation: RotationService,
    events: mpsc::Receiver<EngineEvent>,
    downstream: Option<Arc<dyn EventPublisher>>,
}

impl AdvancementWorker {
    pub fn new(rotation: RotationService, events: mpsc::Receiver<EngineEvent>) -> Self {
        Self {
            rotation,
            events,
            downstream: None,
        }
    }

    /// Forward every consumed event to `publisher` (notifications, payments).
    pub fn with_downstream(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.downstream = Some(publisher);
        self
    }

    /// Run until every sender of the channel is dropped.
    pub async fn run(mut self) {
        info!("Advancement worker started");

        while let Some(event) = self.events.recv().await {
            if let EngineEvent::AdvancementCheckRequested { group_id, .. } = &event {
                self.check(*group_id).await;
            }
            if let Some(downstream) = &self.downstream {
                if let Err(err) = downstream.publish(event) {
                    debug!(error = %err, "Downstream publish failed");
                }
            }
        }

        info!("Advancement worker stopped");
    }

    async fn check(&self, group_id: GroupId) {
        match self.rotation.advance(group_id).await {
            Ok(outcome) => debug!(
                group_id = %group_id,
                new_position = outcome.new_position,
                "Advancement check advanced the rotation"
            ),
            Err(err) if err.kind() == ErrorKind::Concurrency => {
                debug!(group_id = %group_id, reason = %err, "Advancement check found nothing to do")
            }
            Err(err) => error!(group_id = %group_id, error = %err, "Advancement check failed"),
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
