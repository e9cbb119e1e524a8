use thiserror::Error;

use super::state::SessionId;

/// Closed set of failures returned by the supervisor's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The caller sent something invalid. Safe to show verbatim.
    #[error("{0}")]
    ClientFault(String),

    /// Something went wrong on our side. Details are for logs only.
    #[error("Service unavailable: {0}")]
    ServiceFault(String),
}

impl SessionError {
    pub fn client(message: impl Into<String>) -> Self {
        SessionError::ClientFault(message.into())
    }

    pub fn service(message: impl Into<String>) -> Self {
        SessionError::ServiceFault(message.into())
    }

    pub fn is_client_fault(&self) -> bool {
        matches!(self, SessionError::ClientFault(_))
    }

    /// Message suitable for the end user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::ClientFault(message) => message.clone(),
            SessionError::ServiceFault(_) => {
                "The messaging service is temporarily unavailable, please try again".to_string()
            }
        }
    }
}

/// Successful `StartSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStarted {
    pub session_id: SessionId,
    /// A session was already Connecting or Connected; nothing new was opened.
    pub reused: bool,
    /// A status write to the session store failed.
    pub store_degraded: bool,
}

/// Successful `Disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected {
    /// A live or pending connection was torn down.
    pub was_active: bool,
    pub store_degraded: bool,
}
