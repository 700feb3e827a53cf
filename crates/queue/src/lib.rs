//! `queue` crate: in-process hand-off between the event bus and the
//! trigger dispatcher.
//!
//! Producers never block: [`EventSender::enqueue`] either accepts the event
//! immediately or reports back-pressure as [`QueueError::Full`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A domain event waiting to be matched against workflow triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// e.g. `"lead.created"`
    pub event_type: String,
    pub payload: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl QueuedEvent {
    pub fn new(tenant_id: Uuid, event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type: event_type.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue is full (capacity {0})")]
    Full(usize),

    #[error("event queue is closed")]
    Closed,
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<QueuedEvent>,
    capacity: usize,
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<QueuedEvent>,
}

/// Create a bounded queue holding at most `capacity` pending events.
pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx, capacity }, EventReceiver { rx })
}

impl EventSender {
    /// Queue an event without waiting.
    pub fn enqueue(&self, event: QueuedEvent) -> Result<(), QueueError> {
        let event_id = event.id;
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!(%event_id, "event queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!(event_id = %ev.id, event_type = %ev.event_type, "event queue full, rejecting");
                Err(QueueError::Full(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<QueuedEvent> {
        self.rx.recv().await
    }

    /// Stop accepting new events; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str) -> QueuedEvent {
        QueuedEvent::new(Uuid::new_v4(), kind, json!({ "lead_id": 1 }).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = bounded(4);
        tx.enqueue(event("a")).unwrap();
        tx.enqueue(event("b")).unwrap();

        assert_eq!(rx.recv().await.unwrap().event_type, "a");
        assert_eq!(rx.recv().await.unwrap().event_type, "b");
    }

    #[tokio::test]
    async fn full_queue_rejects_instead_of_blocking() {
        let (tx, _rx) = bounded(1);
        tx.enqueue(event("a")).unwrap();
        assert_eq!(tx.enqueue(event("b")), Err(QueueError::Full(1)));
    }

    #[tokio::test]
    async fn closed_queue_rejects() {
        let (tx, mut rx) = bounded(2);
        rx.close();
        assert_eq!(tx.enqueue(event("a")), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn receiver_ends_when_senders_drop() {
        let (tx, mut rx) = bounded(2);
        tx.enqueue(event("a")).unwrap();
        drop(tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
