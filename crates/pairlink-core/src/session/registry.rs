//! Process-wide registry of live connections.
//!
//! An entry exists only while the user is Connecting or Connected. Every
//! mutation happens under a single short-lived lock, so lookups never see a
//! half-applied transition and never suspend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::state::{Artifact, AuthMethod, SessionId, SessionStatus, UserId};
use crate::protocol::{Connection, CredentialMaterial};

/// Snapshot of a user's in-memory lifecycle, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveState {
    pub status: SessionStatus,
    pub artifact: Option<Artifact>,
}

impl LiveState {
    pub fn connecting() -> Self {
        Self {
            status: SessionStatus::Connecting,
            artifact: None,
        }
    }
}

/// One live protocol connection and the material it was opened with.
pub struct ConnectionHandle {
    pub connection: Arc<dyn Connection>,
    pub credentials: CredentialMaterial,
    /// Cancels this connection's event consumer.
    pub consumer: CancellationToken,
}

pub(crate) struct RegistryEntry {
    pub session_id: SessionId,
    pub generation: u64,
    pub status: SessionStatus,
    /// `None` for resume-only entries that never asked for an artifact.
    pub auth: Option<AuthMethod>,
    pub handle: Option<ConnectionHandle>,
    /// Parent of every consumer and reconnect timer for this entry.
    pub shutdown: CancellationToken,
    pub live: watch::Sender<LiveState>,
}

/// Result of the atomic check-then-act in [`Registry::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Claim {
    Existing(SessionId),
    New {
        session_id: SessionId,
        generation: u64,
    },
}

/// Data needed to schedule a reconnection after a transient close.
pub(crate) struct ReconnectTicket {
    pub shutdown: CancellationToken,
    pub auth: Option<AuthMethod>,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<UserId, RegistryEntry>>,
    next_generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Return the existing session for `user_id`, or register a new
    /// Connecting entry. Both happen under the same lock.
    pub(crate) fn claim(&self, user_id: &UserId, auth: Option<AuthMethod>) -> Claim {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(user_id) {
            return Claim::Existing(entry.session_id.clone());
        }

        let session_id = SessionId::new();
        let generation = self.bump();
        let (live, _) = watch::channel(LiveState::connecting());
        entries.insert(
            user_id.clone(),
            RegistryEntry {
                session_id: session_id.clone(),
                generation,
                status: SessionStatus::Connecting,
                auth,
                handle: None,
                shutdown: CancellationToken::new(),
                live,
            },
        );
        Claim::New {
            session_id,
            generation,
        }
    }

    /// Install the connection opened for `generation`.
    ///
    /// Returns the consumer token, or gives the handle back if the entry
    /// was removed or superseded while the connection was opening.
    pub(crate) fn attach(
        &self,
        user_id: &UserId,
        generation: u64,
        connection: Arc<dyn Connection>,
        credentials: CredentialMaterial,
    ) -> Result<CancellationToken, Arc<dyn Connection>> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries
            .get_mut(user_id)
            .filter(|e| e.generation == generation)
        else {
            return Err(connection);
        };

        let consumer = entry.shutdown.child_token();
        if let Some(previous) = entry.handle.replace(ConnectionHandle {
            connection,
            credentials,
            consumer: consumer.clone(),
        }) {
            previous.consumer.cancel();
            previous.connection.close();
        }
        Ok(consumer)
    }

    pub(crate) fn is_current(&self, user_id: &UserId, generation: u64) -> bool {
        self.entries
            .lock()
            .get(user_id)
            .is_some_and(|e| e.generation == generation)
    }

    pub(crate) fn mark_connected(&self, user_id: &UserId, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries
            .get_mut(user_id)
            .filter(|e| e.generation == generation)
        {
            Some(entry) => {
                entry.status = SessionStatus::Connected;
                entry.live.send_replace(LiveState {
                    status: SessionStatus::Connected,
                    artifact: None,
                });
                true
            }
            None => false,
        }
    }

    /// Publish a new artifact for the current connection attempt.
    pub(crate) fn publish_artifact(
        &self,
        user_id: &UserId,
        generation: u64,
        artifact: Artifact,
    ) -> bool {
        let entries = self.entries.lock();
        match entries.get(user_id).filter(|e| e.generation == generation) {
            Some(entry) => {
                entry.live.send_replace(LiveState {
                    status: SessionStatus::Connecting,
                    artifact: Some(artifact),
                });
                true
            }
            None => false,
        }
    }

    pub(crate) fn update_credentials(
        &self,
        user_id: &UserId,
        generation: u64,
        credentials: CredentialMaterial,
    ) {
        let mut entries = self.entries.lock();
        if let Some(handle) = entries
            .get_mut(user_id)
            .filter(|e| e.generation == generation)
            .and_then(|e| e.handle.as_mut())
        {
            handle.credentials = credentials;
        }
    }

    /// Connected -> Connecting after a transient close. Drops the handle so
    /// nothing can look up the dead connection.
    pub(crate) fn mark_reconnecting(
        &self,
        user_id: &UserId,
        generation: u64,
    ) -> Option<ReconnectTicket> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(user_id)
            .filter(|e| e.generation == generation)?;

        if let Some(handle) = entry.handle.take() {
            handle.consumer.cancel();
            handle.connection.close();
        }
        entry.status = SessionStatus::Connecting;
        entry.live.send_replace(LiveState::connecting());
        Some(ReconnectTicket {
            shutdown: entry.shutdown.clone(),
            auth: entry.auth.clone(),
        })
    }

    /// Start a replacement attempt if `expected_generation` still owns the
    /// entry. Returns the new generation.
    pub(crate) fn begin_attempt(&self, user_id: &UserId, expected_generation: u64) -> Option<u64> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(user_id)
            .filter(|e| e.generation == expected_generation && !e.shutdown.is_cancelled())?;

        if let Some(handle) = entry.handle.take() {
            handle.consumer.cancel();
            handle.connection.close();
        }
        entry.generation = self.bump();
        Some(entry.generation)
    }

    /// Remove the entry, cancelling its consumer and any pending reconnect
    /// in the same critical section.
    pub(crate) fn remove(&self, user_id: &UserId) -> Option<RegistryEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(user_id)?;
        Self::retire(&entry);
        Some(entry)
    }

    /// Like [`Registry::remove`], but only if `generation` still owns the entry.
    pub(crate) fn remove_generation(
        &self,
        user_id: &UserId,
        generation: u64,
    ) -> Option<RegistryEntry> {
        let mut entries = self.entries.lock();
        if entries.get(user_id)?.generation != generation {
            return None;
        }
        let entry = entries.remove(user_id)?;
        Self::retire(&entry);
        Some(entry)
    }

    pub(crate) fn drain(&self) -> Vec<(UserId, RegistryEntry)> {
        let mut entries = self.entries.lock();
        let drained: Vec<_> = entries.drain().collect();
        for (_, entry) in &drained {
            Self::retire(entry);
        }
        drained
    }

    fn retire(entry: &RegistryEntry) {
        entry.shutdown.cancel();
        entry.live.send_replace(LiveState {
            status: SessionStatus::Disconnected,
            artifact: None,
        });
    }

    /// The live connection, only while Connected.
    pub fn lookup(&self, user_id: &UserId) -> Option<Arc<dyn Connection>> {
        let entries = self.entries.lock();
        let entry = entries.get(user_id)?;
        if entry.status != SessionStatus::Connected {
            return None;
        }
        entry.handle.as_ref().map(|h| Arc::clone(&h.connection))
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.entries.lock().contains_key(user_id)
    }

    pub fn status(&self, user_id: &UserId) -> SessionStatus {
        self.entries
            .lock()
            .get(user_id)
            .map(|e| e.status)
            .unwrap_or(SessionStatus::Disconnected)
    }

    pub fn session_id(&self, user_id: &UserId) -> Option<SessionId> {
        self.entries
            .lock()
            .get(user_id)
            .map(|e| e.session_id.clone())
    }

    /// The auth method the entry was started with, `None` for resume-only entries.
    pub(crate) fn auth(&self, user_id: &UserId) -> Option<AuthMethod> {
        self.entries.lock().get(user_id).and_then(|e| e.auth.clone())
    }

    pub fn subscribe(&self, user_id: &UserId) -> Option<watch::Receiver<LiveState>> {
        self.entries.lock().get(user_id).map(|e| e.live.subscribe())
    }

    /// Number of live handles (entries with an attached connection).
    pub fn live_handles(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.handle.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
