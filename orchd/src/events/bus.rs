//! Live event bus - broadcasts task events as they are appended, for the
//! TUI/CLI `events tail` consumer and any other in-process subscriber.
//!
//! Durability lives in [`crate::domain::TaskEvent`] via the state store
//! (§4.1); this bus is purely a fan-out for readers that want to observe
//! activity as it happens rather than poll `listSince`.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::TaskEvent;

/// At roughly one agent step per second across a handful of concurrent
/// workers, this buffers several hours of activity before a slow
/// subscriber starts dropping events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for orchestrator activity streaming.
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Broadcast an event. Fire-and-forget: with no subscribers the send
    /// is simply dropped.
    pub fn emit(&self, event: TaskEvent) {
        debug!(task_id = %event.task_id, event_type = %event.event_type, "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Bind an emitter to a single task so callers don't repeat its id.
    pub fn emitter_for(&self, task_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            task_id: task_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone handle bound to one task's id.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<TaskEvent>,
    task_id: String,
}

impl EventEmitter {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskEventType;

    #[test]
    fn subscriber_count_tracks_subscriptions() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn emitted_event_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("task-1");

        emitter.emit(TaskEvent::new("task-1", TaskEventType::TaskCreated));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, "task-1");
        assert_eq!(event.event_type, TaskEventType::TaskCreated);
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(TaskEvent::new("task-1", TaskEventType::TaskCreated));
    }
}
