//! Inbound dispatcher.
//!
//! Classifies each inbound message and routes it to at most one feature.
//! Nothing a feature does, including panicking, escapes [`InboundDispatcher::handle`]:
//! one event stream serves one user for the lifetime of the process.

pub mod command;
pub mod quoted;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::features::{CaptureHandler, CaptureRequest, CaptureSource};
use crate::protocol::{Connection, InboundMessage};
use crate::session::UserId;

pub use command::Command;
pub use quoted::{extract_quoted, QUOTED_CONTEXTS};

/// Connection resolution offered to the dispatcher and feature handlers.
#[async_trait]
pub trait ConnectionLookup: Send + Sync {
    /// The registered live connection. Never suspends.
    fn lookup_connection(&self, user_id: &UserId) -> Option<Arc<dyn Connection>>;

    /// One best-effort resume from stored credentials. True if a live
    /// connection exists afterwards.
    async fn reconnect_if_credentials_exist(&self, user_id: &UserId) -> bool;
}

/// What [`InboundDispatcher::handle`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No text in any source.
    NoText,
    /// Text that is not a command.
    NotACommand,
    /// A command without a reply context. Silently ignored.
    NoQuotedMessage,
    /// Every connection fallback came up empty.
    NoConnection,
    Captured,
    /// The feature failed or panicked. Logged and swallowed.
    HandlerFailed,
}

pub struct InboundDispatcher {
    capture: Arc<dyn CaptureHandler>,
}

impl InboundDispatcher {
    pub fn new(capture: Arc<dyn CaptureHandler>) -> Self {
        Self { capture }
    }

    pub async fn handle(
        &self,
        lookup: &dyn ConnectionLookup,
        user_id: &UserId,
        event_connection: Option<Arc<dyn Connection>>,
        message: &InboundMessage,
    ) -> Dispatch {
        let Some(text) = message.content.extract_text() else {
            log::trace!("No text in {:?} message {} for {}", message.kind(), message.id, user_id);
            return Dispatch::NoText;
        };
        let Some(command) = Command::parse(text) else {
            return Dispatch::NotACommand;
        };
        let Some(quoted) = extract_quoted(&message.content) else {
            log::debug!(
                "{} from {} for {} has no quoted message",
                command,
                message.sender_id,
                user_id
            );
            return Dispatch::NoQuotedMessage;
        };

        let Some(connection) = self
            .resolve_connection(lookup, user_id, event_connection)
            .await
        else {
            log::warn!("Dropping {} for {}: no usable connection", command, user_id);
            return Dispatch::NoConnection;
        };

        let request = CaptureRequest {
            user_id: user_id.clone(),
            connection,
            quoted,
            chat_id: message.chat_id.clone(),
            sender_id: message.sender_id.clone(),
            captured_by: CaptureSource::Command,
        };

        match AssertUnwindSafe(self.capture.capture(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                log::info!("{} handled for {} in {}", command, user_id, message.chat_id);
                Dispatch::Captured
            }
            Ok(Err(e)) => {
                log::error!("{} failed for {}: {}", command, user_id, e);
                Dispatch::HandlerFailed
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("{} panicked for {}: {}", command, user_id, detail);
                Dispatch::HandlerFailed
            }
        }
    }

    /// Registry first, then the connection the event arrived on, then one
    /// resume attempt from stored credentials.
    async fn resolve_connection(
        &self,
        lookup: &dyn ConnectionLookup,
        user_id: &UserId,
        event_connection: Option<Arc<dyn Connection>>,
    ) -> Option<Arc<dyn Connection>> {
        if let Some(connection) = lookup.lookup_connection(user_id) {
            return Some(connection);
        }
        if let Some(connection) = event_connection {
            return Some(connection);
        }
        if lookup.reconnect_if_credentials_exist(user_id).await {
            return lookup.lookup_connection(user_id);
        }
        None
    }
}
