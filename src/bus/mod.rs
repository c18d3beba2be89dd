//! Event bus
//!
//! Single ordered ingestion queue feeding the supervisor loop. Publishing
//! validates the event, stamps it with an id and timestamp and enqueues it.
//! The queue is unbounded: producers never wait on the consumer. Only the
//! history kept by the supervisor is bounded.
//!
//! Events from one publisher keep their relative order. Across publishers the
//! order is arrival order.

mod event;
mod history;

pub use event::{
    EventDraft, GlobalEvent, AGENT_ERROR, AGENT_HEARTBEAT, AGENT_SPAWNED, AGENT_STUCK,
    AGENT_TERMINATED, MEMORY_LEAK, PAGE_VIEW, SYSTEM_ALERT, SYSTEM_PERFORMANCE,
};
pub use history::EventHistory;

use crate::clock::SharedClock;
use crate::{metrics, OverseerError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Producer side of the bus; cheap to clone
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<GlobalEvent>,
    depth: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
    clock: SharedClock,
}

/// Consumer side of the bus, owned by the supervisor loop
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<GlobalEvent>,
    depth: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a bus and its single consumer
    pub fn new(clock: SharedClock) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let bus = Self {
            tx,
            depth: depth.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
            clock,
        };
        (bus, EventReceiver { rx, depth })
    }

    /// Validate and enqueue an event, returning its id
    ///
    /// Malformed drafts are rejected here and never reach the queue.
    pub fn publish(&self, draft: EventDraft) -> Result<String> {
        let (event_type, source) = match draft.validate() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "Rejected event at publish");
                return Err(e);
            }
        };

        let id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = GlobalEvent {
            id: id.clone(),
            event_type,
            source,
            payload: match draft.payload {
                Value::Null => Value::Object(Default::default()),
                payload => payload,
            },
            timestamp: self.clock.now(),
        };

        debug!(event_id = %id, event_type = %event.event_type, "Publishing event");

        // Count before sending so the consumer never sees a negative depth
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(event).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(OverseerError::Other("Event bus is closed".to_string()));
        }
        metrics::set_queue_depth(depth);

        Ok(id)
    }

    /// Publish from parts
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: Value,
    ) -> Result<String> {
        self.publish(EventDraft::new(event_type, source).with_payload(payload))
    }

    /// Events accepted but not yet taken by the consumer
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Wait for the next event; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<GlobalEvent> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.taken();
        }
        event
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<GlobalEvent> {
        let event = self.rx.try_recv().ok();
        if event.is_some() {
            self.taken();
        }
        event
    }

    fn taken(&self) {
        let remaining = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_queue_depth(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn bus() -> (EventBus, EventReceiver) {
        EventBus::new(Arc::new(ManualClock::new()))
    }

    #[tokio::test]
    async fn test_publish_assigns_ids_in_order() {
        let (bus, mut rx) = bus();
        let first = bus.emit("page:view", "web", json!({"page": "/"})).unwrap();
        let second = bus.emit("page:view", "web", json!({"page": "/docs"})).unwrap();
        assert_ne!(first, second);
        assert_eq!(bus.queue_depth(), 2);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.id, first);
        assert_eq!(b.payload["page"], "/docs");
        assert_eq!(bus.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_malformed_event_never_enqueued() {
        let (bus, mut rx) = bus();
        let draft = EventDraft {
            source: Some("web".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bus.publish(draft),
            Err(OverseerError::MalformedEvent(_))
        ));
        assert_eq!(bus.queue_depth(), 0);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_empty_payload_becomes_object() {
        let (bus, mut rx) = bus();
        bus.publish(EventDraft::new("system:alert", "monitor")).unwrap();
        let event = rx.try_recv().unwrap();
        assert!(event.payload.is_object());
    }

    #[test]
    fn test_publish_after_consumer_dropped() {
        let (bus, rx) = bus();
        drop(rx);
        assert!(bus.is_closed());
        assert!(bus.emit("page:view", "web", json!({})).is_err());
        assert_eq!(bus.queue_depth(), 0);
    }
}
