//! # Publisher Hub
//!
//! Fan-out of engine events to all connected real-time subscribers. Each
//! subscriber owns an unbounded channel, so a slow consumer queues its own
//! backlog instead of blocking the worker loop or its peers. Delivery
//! failure means the receiving side is gone; the subscriber is pruned from
//! the registry and the publish call never raises into the caller.
//!
//! Ordering: events reach a single subscriber in `publish` call order.
//! Nothing is guaranteed across subscribers.

use crate::transcription::store::TranscriptEntry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// An event pushed to real-time subscribers.
#[derive(Debug, Clone)]
pub enum SpeechEvent {
    /// Lifecycle/config snapshot, also sent immediately on subscribe
    Status {
        running: bool,
        model: String,
        language: String,
    },

    /// One accepted transcript entry
    Transcription(TranscriptEntry),

    /// Inference trouble worth telling the UI about
    Error { message: String },
}

impl SpeechEvent {
    /// The wire frame: `{"event": <kind>, "data": {...}}`.
    pub fn to_frame(&self) -> serde_json::Value {
        match self {
            SpeechEvent::Status {
                running,
                model,
                language,
            } => json!({
                "event": "status",
                "data": {
                    "running": running,
                    "model": model,
                    "language": language,
                }
            }),
            SpeechEvent::Transcription(entry) => json!({
                "event": "transcription",
                "data": entry,
            }),
            SpeechEvent::Error { message } => json!({
                "event": "error",
                "data": { "message": message },
            }),
        }
    }
}

pub struct PublisherHub {
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<SpeechEvent>>>,
}

impl PublisherHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscriber. The initial status event is delivered
    /// into the fresh channel before anything else can be published to it.
    pub fn subscribe(&self, initial_status: SpeechEvent) -> (Uuid, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        // Send before registering so the status frame is first in the queue.
        let _ = tx.send(initial_status);

        self.subscribers.lock().unwrap().insert(id, tx);
        debug!("Subscriber {} registered", id);
        (id, rx)
    }

    /// Remove a subscriber explicitly (connection closed).
    pub fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.lock().unwrap().remove(id).is_some() {
            debug!("Subscriber {} removed", id);
        }
    }

    /// Deliver an event to every registered subscriber. Subscribers whose
    /// channel is closed are dropped from the registry.
    pub fn publish(&self, event: SpeechEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|id, tx| {
            if tx.send(event.clone()).is_ok() {
                true
            } else {
                debug!("Subscriber {} disconnected, pruning", id);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for PublisherHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> SpeechEvent {
        SpeechEvent::Status {
            running: false,
            model: "base".to_string(),
            language: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_initial_status_first() {
        let hub = PublisherHub::new();
        let (_id, mut rx) = hub.subscribe(status());

        hub.publish(SpeechEvent::Error {
            message: "later".to_string(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SpeechEvent::Status { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, SpeechEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = PublisherHub::new();
        let (_id, mut rx) = hub.subscribe(status());
        let _ = rx.recv().await; // drain status

        for i in 0..5 {
            hub.publish(SpeechEvent::Error {
                message: format!("{}", i),
            });
        }

        for i in 0..5 {
            match rx.recv().await.unwrap() {
                SpeechEvent::Error { message } => assert_eq!(message, format!("{}", i)),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_pruned_on_publish() {
        let hub = PublisherHub::new();
        let (_id, rx) = hub.subscribe(status());
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        hub.publish(status());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_registration() {
        let hub = PublisherHub::new();
        let (id, _rx) = hub.subscribe(status());
        hub.unsubscribe(&id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_frame_shapes() {
        let frame = SpeechEvent::Transcription(TranscriptEntry {
            timestamp: "00:00:01".to_string(),
            text: "hello".to_string(),
            confidence: 0.92,
        })
        .to_frame();

        assert_eq!(frame["event"], "transcription");
        assert_eq!(frame["data"]["text"], "hello");
        assert_eq!(frame["data"]["timestamp"], "00:00:01");

        let frame = SpeechEvent::Status {
            running: true,
            model: "base".to_string(),
            language: "en".to_string(),
        }
        .to_frame();
        assert_eq!(frame["event"], "status");
        assert_eq!(frame["data"]["running"], true);
    }
}
