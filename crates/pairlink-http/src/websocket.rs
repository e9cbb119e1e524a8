//! WebSocket handler for real-time lifecycle events.
//!
//! Clients connect to `/ws/events` and receive events from the EventBus.
//! Sending `{"subscribe": "session:qr:*"}` narrows the feed; with no
//! subscriptions every event is forwarded.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use pairlink_core::event_bus::{matches_pattern, BroadcastEvent};

use super::SharedState;

/// Control message from the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum ClientRequest {
    Subscribe { subscribe: String },
    Unsubscribe { unsubscribe: String },
}

/// WebSocket event message sent to client.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WsEvent {
    event_type: String,
    payload: serde_json::Value,
}

/// Handler for GET /ws/events
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SharedState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<SharedState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriptions: HashSet<String> = HashSet::new();
    let mut event_rx = state.event_bus.subscribe();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => apply_request(&mut subscriptions, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("WebSocket receive failed: {}", e);
                    break;
                }
            },
            event = event_rx.recv() => match event {
                Ok(event) => {
                    if !wanted(&subscriptions, &event.event_type) {
                        continue;
                    }
                    let Some(json) = encode(event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break; // Client disconnected
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    log::warn!("WebSocket client lagged by {} events", count);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::debug!("WebSocket connection closed");
}

fn apply_request(subscriptions: &mut HashSet<String>, text: &str) {
    match serde_json::from_str::<ClientRequest>(text) {
        Ok(ClientRequest::Subscribe { subscribe }) => {
            log::debug!("WebSocket subscribed to {}", subscribe);
            subscriptions.insert(subscribe);
        }
        Ok(ClientRequest::Unsubscribe { unsubscribe }) => {
            log::debug!("WebSocket unsubscribed from {}", unsubscribe);
            subscriptions.remove(&unsubscribe);
        }
        Err(_) => log::debug!("Ignoring websocket message: {}", text),
    }
}

fn wanted(subscriptions: &HashSet<String>, event_type: &str) -> bool {
    subscriptions.is_empty()
        || subscriptions
            .iter()
            .any(|pattern| matches_pattern(event_type, pattern))
}

fn encode(event: BroadcastEvent) -> Option<String> {
    serde_json::to_string(&WsEvent {
        event_type: event.event_type,
        payload: event.payload,
    })
    .ok()
}
