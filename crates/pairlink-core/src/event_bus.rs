//! Lifecycle event broadcasting.
//!
//! The supervisor publishes every status change and every issued QR or
//! pairing artifact here, so HTTP websockets (or anything else) can follow
//! a user's session without polling the store.
//!
//! Topics:
//! - `session:status:<user>` with `{ "status": ..., "sessionId": ... }`
//! - `session:qr:<user>` with `{ "qr": ... }`
//! - `session:pairing:<user>` with `{ "code": ... }`

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::{SessionId, SessionStatus, UserId};

/// Events beyond this many unread cause slow subscribers to lag.
const DEFAULT_CAPACITY: usize = 1024;

/// A broadcast event: a topic plus JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

pub fn status_topic(user_id: &UserId) -> String {
    format!("session:status:{user_id}")
}

pub fn qr_topic(user_id: &UserId) -> String {
    format!("session:qr:{user_id}")
}

pub fn pairing_topic(user_id: &UserId) -> String {
    format!("session:pairing:{user_id}")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload<'a> {
    status: SessionStatus,
    session_id: Option<&'a SessionId>,
}

/// Publish-subscribe fan-out over a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it; 0 when nobody
    /// is listening or the payload failed to serialize.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let json_payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize event payload: {}", e);
                return 0;
            }
        };

        self.sender
            .send(BroadcastEvent::new(event_type, json_payload))
            .unwrap_or(0)
    }

    pub fn emit_status(
        &self,
        user_id: &UserId,
        status: SessionStatus,
        session_id: Option<&SessionId>,
    ) -> usize {
        self.emit(
            &status_topic(user_id),
            &StatusPayload { status, session_id },
        )
    }

    pub fn emit_qr(&self, user_id: &UserId, qr: &str) -> usize {
        self.emit(&qr_topic(user_id), &serde_json::json!({ "qr": qr }))
    }

    pub fn emit_pairing_code(&self, user_id: &UserId, code: &str) -> usize {
        self.emit(&pairing_topic(user_id), &serde_json::json!({ "code": code }))
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
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

/// Whether `event_type` matches a subscription pattern.
///
/// A trailing `*` matches any suffix; otherwise the match is exact.
pub fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => event_type == pattern,
    }
}
