//! Capability surface of the messaging protocol library.
//!
//! The supervisor never speaks the wire protocol itself. It opens
//! connections through a [`ProtocolClient`] and consumes the typed
//! [`ProtocolEvent`] stream each connection produces.

pub mod message;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{AuthMethod, UserId};

pub use message::{
    ContentKind, ContextInfo, InboundMessage, MediaKind, MediaMessage, MediaRef, MessageContent,
    QuotedMessage,
};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to open connection: {0}")]
    OpenFailed(String),

    #[error("Credential material is corrupt: {0}")]
    CorruptCredentials(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Other(String),
}

/// Opaque authentication material owned by the protocol library.
///
/// `registered` is true once a device link completed at least once, i.e.
/// the material can resume a session without a new QR or pairing code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialMaterial {
    #[serde(default)]
    pub registered: bool,
    pub data: serde_json::Value,
}

impl CredentialMaterial {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            registered: false,
            data,
        }
    }
}

/// How a connection should authenticate when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthRequest {
    /// Issue QR artifacts until the device links.
    Qr,
    /// Request a pairing code for this phone number.
    #[serde(rename_all = "camelCase")]
    PairingCode { phone_number: String },
    /// Reuse stored material, never issue a new artifact.
    Resume,
}

impl From<&AuthMethod> for AuthRequest {
    fn from(method: &AuthMethod) -> Self {
        match method {
            AuthMethod::Qr => AuthRequest::Qr,
            AuthMethod::PairingCode { phone_number } => AuthRequest::PairingCode {
                phone_number: phone_number.clone(),
            },
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "camelCase")]
pub enum CloseReason {
    LoggedOut,
    CredentialsRejected,
    ConnectionReplaced,
    ConnectionLost,
    TimedOut,
    RestartRequired,
    Other(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::LoggedOut => write!(f, "logged out"),
            CloseReason::CredentialsRejected => write!(f, "credentials rejected"),
            CloseReason::ConnectionReplaced => write!(f, "connection replaced"),
            CloseReason::ConnectionLost => write!(f, "connection lost"),
            CloseReason::TimedOut => write!(f, "timed out"),
            CloseReason::RestartRequired => write!(f, "restart required"),
            CloseReason::Other(detail) => write!(f, "{detail}"),
        }
    }
}

/// Tagged events yielded by a live connection.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    QrIssued(String),
    PairingCodeIssued(String),
    Opened,
    Closed { reason: CloseReason, terminal: bool },
    CredentialsRotated(CredentialMaterial),
    InboundMessage(InboundMessage),
}

impl ProtocolEvent {
    /// Whether a close must not trigger automatic reconnection.
    pub fn is_terminal_close(reason: &CloseReason, terminal: bool) -> bool {
        terminal || *reason == CloseReason::LoggedOut
    }
}

/// Content of an outbound protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundContent {
    Text(String),
    Media {
        kind: MediaKind,
        bytes: Vec<u8>,
        mimetype: Option<String>,
        caption: Option<String>,
    },
}

/// One live protocol connection.
///
/// Implementations must be cheap to share; the supervisor hands out
/// `Arc<dyn Connection>` clones for the duration of a single call.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<(), ProtocolError>;

    /// Download the media referenced by a message. `None` if it expired.
    async fn download_media(&self, media: &MediaRef) -> Result<Option<Vec<u8>>, ProtocolError>;

    /// Gracefully unlink the device.
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Drop the socket without unlinking.
    fn close(&self);

    /// Chat identifier of the linked account itself, once known.
    fn account_chat_id(&self) -> Option<String>;
}

/// A freshly opened connection and its event stream.
pub struct OpenedConnection {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Factory for protocol connections.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// New, unregistered credential material.
    fn fresh_credentials(&self) -> CredentialMaterial;

    /// Open a connection. Returns as soon as negotiation has started;
    /// the outcome arrives on the event stream.
    async fn open(
        &self,
        user_id: &UserId,
        credentials: CredentialMaterial,
        auth: AuthRequest,
    ) -> Result<OpenedConnection, ProtocolError>;
}
