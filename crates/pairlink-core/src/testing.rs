//! Test doubles for the protocol capability and feature handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use crate::features::{CaptureHandler, CaptureRequest, FeatureError};
use crate::protocol::{
    AuthRequest, Connection, CredentialMaterial, MediaRef, OpenedConnection, OutboundContent,
    ProtocolClient, ProtocolError, ProtocolEvent,
};
use crate::session::UserId;

// ============================================================================
// Connection
// ============================================================================

#[derive(Default)]
pub struct FakeConnection {
    account: Option<String>,
    closed: AtomicBool,
    logouts: AtomicUsize,
    logout_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<(String, OutboundContent)>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_account(chat_id: &str) -> Arc<Self> {
        Arc::new(Self {
            account: Some(chat_id.to_string()),
            ..Default::default()
        })
    }

    /// Make media with this direct path (or url) downloadable.
    pub fn put_media(&self, path: &str, bytes: Vec<u8>) {
        self.media.lock().insert(path.to_string(), bytes);
    }

    pub fn sent(&self) -> Vec<(String, OutboundContent)> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Make `logout` take this long before it returns.
    pub fn set_logout_delay(&self, delay: Duration) {
        *self.logout_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Closed);
        }
        self.sent.lock().push((chat_id.to_string(), content));
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Option<Vec<u8>>, ProtocolError> {
        let store = self.media.lock();
        Ok([media.direct_path.as_ref(), media.url.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|key| store.get(key).cloned()))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.logout_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn account_chat_id(&self) -> Option<String> {
        self.account.clone()
    }
}

// ============================================================================
// Protocol client
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenCall {
    pub user_id: UserId,
    pub credentials: CredentialMaterial,
    pub auth: AuthRequest,
}

struct Link {
    user_id: UserId,
    connection: Arc<FakeConnection>,
    events: Option<mpsc::Sender<ProtocolEvent>>,
}

/// Protocol client whose connections are driven by the test.
#[derive(Default)]
pub struct FakeProtocol {
    opens: Mutex<Vec<OpenCall>>,
    links: Mutex<Vec<Link>>,
    fail_next_open: Mutex<Option<String>>,
    fresh: AtomicUsize,
}

impl FakeProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_open(&self, message: &str) {
        *self.fail_next_open.lock() = Some(message.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn opens(&self) -> Vec<OpenCall> {
        self.opens.lock().clone()
    }

    pub fn last_open(&self) -> Option<OpenCall> {
        self.opens.lock().last().cloned()
    }

    /// The most recent connection opened for `user_id`.
    pub fn connection(&self, user_id: &UserId) -> Option<Arc<FakeConnection>> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|l| &l.user_id == user_id)
            .map(|l| Arc::clone(&l.connection))
    }

    /// Push an event onto the most recent connection for `user_id`.
    pub fn emit(&self, user_id: &UserId, event: ProtocolEvent) -> bool {
        let links = self.links.lock();
        links
            .iter()
            .rev()
            .find(|l| &l.user_id == user_id)
            .and_then(|l| l.events.as_ref())
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// Drop the sender of the most recent connection, ending its stream.
    pub fn end_stream(&self, user_id: &UserId) {
        let mut links = self.links.lock();
        if let Some(link) = links.iter_mut().rev().find(|l| &l.user_id == user_id) {
            link.events = None;
        }
    }
}

#[async_trait]
impl ProtocolClient for FakeProtocol {
    fn fresh_credentials(&self) -> CredentialMaterial {
        let n = self.fresh.fetch_add(1, Ordering::SeqCst);
        CredentialMaterial::new(json!({ "fresh": n }))
    }

    async fn open(
        &self,
        user_id: &UserId,
        credentials: CredentialMaterial,
        auth: AuthRequest,
    ) -> Result<OpenedConnection, ProtocolError> {
        self.opens.lock().push(OpenCall {
            user_id: user_id.clone(),
            credentials,
            auth,
        });
        if let Some(message) = self.fail_next_open.lock().take() {
            return Err(ProtocolError::OpenFailed(message));
        }

        let (tx, rx) = mpsc::channel(64);
        let connection = FakeConnection::new();
        self.links.lock().push(Link {
            user_id: user_id.clone(),
            connection: Arc::clone(&connection),
            events: Some(tx),
        });
        Ok(OpenedConnection {
            connection,
            events: rx,
        })
    }
}

// ============================================================================
// Capture handler
// ============================================================================

#[derive(Debug, Clone)]
pub struct CaptureCall {
    pub user_id: UserId,
    pub context: &'static str,
    pub chat_id: String,
    pub sender_id: String,
    pub captured_by: &'static str,
    /// `account_chat_id` of the connection the handler was given.
    pub account: Option<String>,
}

#[derive(Default)]
pub struct RecordingCapture {
    calls: Mutex<Vec<CaptureCall>>,
    fail_next: AtomicBool,
    panic_next: AtomicBool,
}

impl RecordingCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<CaptureCall> {
        self.calls.lock().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureHandler for RecordingCapture {
    async fn capture(&self, request: CaptureRequest) -> Result<(), FeatureError> {
        self.calls.lock().push(CaptureCall {
            user_id: request.user_id.clone(),
            context: request.quoted.context,
            chat_id: request.chat_id.clone(),
            sender_id: request.sender_id.clone(),
            captured_by: request.captured_by.label(),
            account: request.connection.account_chat_id(),
        });
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("capture handler blew up");
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FeatureError::Other("scripted failure".to_string()));
        }
        Ok(())
    }
}
