//! Event publisher adapters.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::events::EngineEvent;
use crate::ports::outbound::{EventPublisher, PublishError};

/// Publishes onto a bounded tokio channel.
///
/// Never blocks the publishing call: a full channel is reported as
/// `PublishError::Full` and the caller logs it.
#[derive(Clone, Debug)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<EngineEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: EngineEvent) -> Result<(), PublishError> {
        self.sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

/// No-op publisher for running without collaborators.
#[derive(Debug, Clone, Default)]
pub struct NoOpPublisher;

impl EventPublisher for NoOpPublisher {
    fn publish(&self, _event: EngineEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Recording publisher for tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Recorded events with the given name.
    pub fn named(&self, name: &str) -> Vec<EngineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: EngineEvent) -> Result<(), PublishError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupId, MemberId};

    fn check_event() -> EngineEvent {
        EngineEvent::AdvancementCheckRequested {
            group_id: GroupId::new(),
            recipient_id: MemberId::new(),
        }
    }

    #[test]
    fn test_no_op_publisher() {
        assert!(NoOpPublisher.publish(check_event()).is_ok());
    }

    #[test]
    fn test_recording_publisher() {
        let publisher = RecordingPublisher::new();
        publisher.publish(check_event()).unwrap();
        assert_eq!(publisher.events().len(), 1);
        assert_eq!(publisher.named("advancement_check_requested").len(), 1);
        assert!(publisher.named("payout_due").is_empty());
    }

    #[tokio::test]
    async fn test_channel_publisher_reports_full_and_closed() {
        let (publisher, mut rx) = ChannelEventPublisher::new(1);
        publisher.publish(check_event()).unwrap();
        assert!(matches!(publisher.publish(check_event()), Err(PublishError::Full)));

        assert!(rx.recv().await.is_some());
        drop(rx);
        assert!(matches!(publisher.publish(check_event()), Err(PublishError::Closed)));
    }
}
