//! Feature handlers invoked by the inbound dispatcher.
//!
//! The core only knows these through traits. A handler receives a
//! connection for the duration of one call and must not keep it.

mod forward;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Connection, ProtocolError, QuotedMessage};
use crate::session::UserId;

pub use forward::ForwardToSelf;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Quoted message has nothing to capture")]
    NothingToCapture,

    #[error("Media is no longer available")]
    MediaExpired,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Other(String),
}

/// Who or what triggered a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// The account owner replied with a capture command.
    Command,
}

impl CaptureSource {
    pub fn label(&self) -> &'static str {
        match self {
            CaptureSource::Command => "command",
        }
    }
}

pub struct CaptureRequest {
    pub user_id: UserId,
    pub connection: Arc<dyn Connection>,
    pub quoted: QuotedMessage,
    pub chat_id: String,
    pub sender_id: String,
    pub captured_by: CaptureSource,
}

#[async_trait]
pub trait CaptureHandler: Send + Sync {
    async fn capture(&self, request: CaptureRequest) -> Result<(), FeatureError>;
}
