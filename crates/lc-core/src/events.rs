//! Application event system for SSE broadcasting.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining clients can catch up.
//! Observers subscribe here instead of polling session state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::ids::{EventId, SessionId};
use crate::stream::SessionStatus;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventCategory
// ---------------------------------------------------------------------------

/// Topic of an event, used by subscribers to filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Session lifecycle (started, stop requested, ended).
    Session,
    /// Individual encoder output lines.
    Log,
    /// Upload directory changes.
    Media,
}

impl std::str::FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "log" => Ok(Self::Log),
            "media" => Ok(Self::Media),
            other => Err(format!("unknown event category: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Session lifecycle ---------------------------------------------------
    SessionStarted {
        session_id: SessionId,
        input: String,
        vertical: bool,
    },
    SessionStopRequested {
        session_id: SessionId,
    },
    SessionEnded {
        session_id: SessionId,
        status: SessionStatus,
        exit_code: Option<i32>,
    },

    // -- Output --------------------------------------------------------------
    SessionLog {
        session_id: SessionId,
        seq: u64,
        line: String,
    },

    // -- Upload directory ----------------------------------------------------
    MediaUploaded {
        file_name: String,
        size_bytes: u64,
    },
    MediaDeleted {
        file_name: String,
    },
    MediaSwept {
        removed: Vec<String>,
    },
}

impl EventPayload {
    /// The category this payload is broadcast under.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::SessionStarted { .. }
            | Self::SessionStopRequested { .. }
            | Self::SessionEnded { .. } => EventCategory::Session,
            Self::SessionLog { .. } => EventCategory::Log,
            Self::MediaUploaded { .. } | Self::MediaDeleted { .. } | Self::MediaSwept { .. } => {
                EventCategory::Media
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, categorised event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Topic.
    pub category: EventCategory,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            category: payload.category(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers.
    ///
    /// Log lines are not kept in the ring buffer; each session keeps its own
    /// bounded log for replay.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        if event.category != EventCategory::Log {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
