use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::tutor::types::TutorReply;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TutorEvent {
    #[serde(rename = "REPLY_READY")]
    ReplyReady { session_id: i64, reply: TutorReply },

    #[serde(rename = "ERROR")]
    Error { session_id: i64, message: String },

    #[serde(rename = "GOALS_CHANGED")]
    GoalsChanged { session_id: i64, goals: Vec<String> },
}

impl TutorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TutorEvent::ReplyReady { .. } => "REPLY_READY",
            TutorEvent::Error { .. } => "ERROR",
            TutorEvent::GoalsChanged { .. } => "GOALS_CHANGED",
        }
    }

    pub fn session_id(&self) -> i64 {
        match self {
            TutorEvent::ReplyReady { session_id, .. }
            | TutorEvent::Error { session_id, .. }
            | TutorEvent::GoalsChanged { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event: TutorEvent,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of tutor events to the presentation layer.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: TutorEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };
        debug!(event_type = envelope.event.event_type(), "publishing tutor event");
        // No subscribers is fine: the event is simply dropped.
        let _ = self.sender.send(envelope);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
