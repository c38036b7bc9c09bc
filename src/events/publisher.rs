use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::types::OrchestrationEvent;
use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;

/// Broadcast publisher for orchestration lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: OrchestrationEvent,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Publishing with no subscribers is not an error; lagging subscribers lose the
    /// oldest events.
    pub fn publish(&self, event: OrchestrationEvent) {
        let published = PublishedEvent {
            name: event.name(),
            event,
            published_at: Utc::now(),
        };

        if self.sender.send(published).is_err() {
            tracing::trace!("No event subscribers attached");
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::states::ExecutionStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let publisher = EventPublisher::new(8);
        let mut receiver = publisher.subscribe();
        let execution_id = Uuid::new_v4();

        publisher.publish(OrchestrationEvent::ExecutionStatusChanged {
            execution_id,
            action_ref: "core.local".to_string(),
            from: ExecutionStatus::Requested,
            to: ExecutionStatus::Scheduled,
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name, "execution.status_changed");
        assert_eq!(received.event.execution_id(), Some(execution_id));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(OrchestrationEvent::WorkflowStarted {
            workflow_instance_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
        });
    }
}
