//! Per-user session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a provisioned end-user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one connection lifecycle of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a user's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

/// How the user authorizes a brand new device link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum AuthMethod {
    Qr,
    #[serde(rename_all = "camelCase")]
    PairingCode { phone_number: String },
}

impl AuthMethod {
    /// Build a pairing-code method, normalising the phone number to digits.
    ///
    /// Returns `None` when the number is missing or implausible.
    pub fn pairing_code(phone_number: &str) -> Option<Self> {
        let digits: String = phone_number.chars().filter(|c| c.is_ascii_digit()).collect();
        if (7..=15).contains(&digits.len()) {
            Some(AuthMethod::PairingCode {
                phone_number: digits,
            })
        } else {
            None
        }
    }
}

/// A one-time credential the user presents on their device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Artifact {
    Qr(String),
    PairingCode(String),
}

/// Persisted per-user session row.
///
/// The record is observability only. Whether a connection is usable right
/// now is decided by the in-memory registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            session_id: None,
            status: SessionStatus::Disconnected,
            qr_code: None,
            pairing_code: None,
            connected_at: None,
            last_seen: None,
            updated_at: Utc::now(),
        }
    }

    /// The artifact currently waiting to be presented, if any.
    pub fn artifact(&self) -> Option<Artifact> {
        self.qr_code
            .clone()
            .map(Artifact::Qr)
            .or_else(|| self.pairing_code.clone().map(Artifact::PairingCode))
    }

    pub fn enter_connecting(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
        self.status = SessionStatus::Connecting;
        self.clear_artifacts();
        self.updated_at = Utc::now();
    }

    pub fn issue_qr(&mut self, qr: String) {
        self.status = SessionStatus::Connecting;
        self.qr_code = Some(qr);
        self.pairing_code = None;
        self.updated_at = Utc::now();
    }

    pub fn issue_pairing_code(&mut self, code: String) {
        self.status = SessionStatus::Connecting;
        self.pairing_code = Some(code);
        self.qr_code = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_connected(&mut self) {
        let now = Utc::now();
        self.status = SessionStatus::Connected;
        self.clear_artifacts();
        self.connected_at = Some(now);
        self.last_seen = Some(now);
        self.updated_at = now;
    }

    /// Connected -> Connecting after a transient close.
    pub fn mark_reconnecting(&mut self) {
        self.status = SessionStatus::Connecting;
        self.clear_artifacts();
        self.updated_at = Utc::now();
    }

    pub fn mark_disconnected(&mut self) {
        self.status = SessionStatus::Disconnected;
        self.clear_artifacts();
        self.connected_at = None;
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_seen = Some(now);
        self.updated_at = now;
    }

    fn clear_artifacts(&mut self) {
        self.qr_code = None;
        self.pairing_code = None;
    }
}
