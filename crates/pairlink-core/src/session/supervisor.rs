//! Connection supervisor.
//!
//! Owns the registry and drives each user's state machine:
//!
//! ```text
//! Disconnected -> Connecting (artifacts) -> Connected
//!      ^               ^                        |
//!      |               +---- transient close ---+
//!      +---------- terminal close / disconnect -+
//! ```
//!
//! Every transition for one user runs under that user's async lock, so
//! the registry and the persisted record move in the same order. Each
//! connection is drained by a single consumer task; inbound messages are
//! handed to the dispatcher from that task, which keeps them in delivery
//! order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::error::{Disconnected, SessionError, SessionStarted};
use super::locks::UserLocks;
use super::reconnect::{CloseAction, ReconnectPolicy};
use super::registry::{Claim, LiveState, Registry};
use super::state::{Artifact, AuthMethod, SessionRecord, SessionStatus, UserId};
use crate::config::SupervisorConfig;
use crate::dispatch::{ConnectionLookup, InboundDispatcher};
use crate::event_bus::EventBus;
use crate::logging::TraceLog;
use crate::persistence::{validate_key, CredentialStore, SessionStore};
use crate::protocol::{
    AuthRequest, CloseReason, Connection, CredentialMaterial, InboundMessage, ProtocolClient,
    ProtocolError, ProtocolEvent,
};

/// Outcome counts of [`ConnectionSupervisor::restore_sessions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub resumed: usize,
    /// Records reset to Disconnected because nothing could resume them.
    pub reset: usize,
    pub failed: usize,
}

enum Resume {
    Started,
    AlreadyActive,
    NoCredentials,
    Failed,
}

struct Inner {
    config: SupervisorConfig,
    protocol: Arc<dyn ProtocolClient>,
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: Option<Arc<InboundDispatcher>>,
    events: Arc<EventBus>,
    registry: Registry,
    user_locks: UserLocks,
    trace: TraceLog,
    policy: ReconnectPolicy,
}

pub struct SupervisorBuilder {
    config: SupervisorConfig,
    protocol: Arc<dyn ProtocolClient>,
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: Option<Arc<InboundDispatcher>>,
    events: Option<Arc<EventBus>>,
}

impl SupervisorBuilder {
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<InboundDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> ConnectionSupervisor {
        let policy = ReconnectPolicy::new(self.config.reconnect_delay());
        let trace = TraceLog::new(self.config.trace_dir.clone());
        ConnectionSupervisor {
            inner: Arc::new(Inner {
                config: self.config,
                protocol: self.protocol,
                sessions: self.sessions,
                credentials: self.credentials,
                dispatcher: self.dispatcher,
                events: self.events.unwrap_or_default(),
                registry: Registry::new(),
                user_locks: UserLocks::new(),
                trace,
                policy,
            }),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub fn builder(
        protocol: Arc<dyn ProtocolClient>,
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> SupervisorBuilder {
        SupervisorBuilder {
            config: SupervisorConfig::default(),
            protocol,
            sessions,
            credentials,
            dispatcher: None,
            events: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.events)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Begin linking a device for `user_id`.
    ///
    /// Returns once negotiation has started. Artifacts arrive later through
    /// [`ConnectionSupervisor::get_status`] or [`ConnectionSupervisor::subscribe`].
    /// A user who is already Connecting or Connected gets the existing
    /// session back and nothing new is opened.
    pub async fn start_session(
        &self,
        user_id: &UserId,
        method: AuthMethod,
    ) -> Result<SessionStarted, SessionError> {
        validate_user(user_id)?;
        let method = match method {
            AuthMethod::PairingCode { phone_number } => AuthMethod::pairing_code(&phone_number)
                .ok_or_else(|| SessionError::client("phone number required"))?,
            other => other,
        };

        let _guard = self.inner.user_locks.lock(user_id).await;

        let (session_id, generation) =
            match self.inner.registry.claim(user_id, Some(method.clone())) {
                Claim::Existing(session_id) => {
                    log::debug!("Session for {} already active, reusing", user_id);
                    return Ok(SessionStarted {
                        session_id,
                        reused: true,
                        store_degraded: false,
                    });
                }
                Claim::New {
                    session_id,
                    generation,
                } => (session_id, generation),
            };

        log::info!("Starting session {} for {}", session_id, user_id);
        let record_session = session_id.clone();
        let store_degraded = !self
            .update_record(user_id, move |r| r.enter_connecting(record_session))
            .await;
        self.inner
            .events
            .emit_status(user_id, SessionStatus::Connecting, Some(&session_id));
        self.inner.trace.line(user_id, "START", &format!("{method:?}"));

        let opened = match self.credentials_for_start(user_id).await {
            Ok(credentials) => {
                self.open_connection(user_id, generation, credentials, AuthRequest::from(&method))
                    .await
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(()) => Ok(SessionStarted {
                session_id,
                reused: false,
                store_degraded,
            }),
            Err(e) => {
                log::error!("Failed to open connection for {}: {}", user_id, e);
                self.fail_attempt(user_id, generation, &e.to_string()).await;
                Err(SessionError::service(e.to_string()))
            }
        }
    }

    /// Current record for `user_id`, overlaid with the live in-memory state.
    ///
    /// Never waits on the user's lock. A live connection refreshes
    /// `last_seen` unless a transition is in flight, in which case the
    /// stored record is read as is.
    pub async fn get_status(&self, user_id: &UserId) -> Result<SessionRecord, SessionError> {
        validate_user(user_id)?;
        let guard = self.inner.user_locks.try_lock(user_id);

        let mut record = self.load_record(user_id).await;
        if guard.is_some() && self.inner.registry.lookup(user_id).is_some() {
            record.touch();
            self.save_record(&record).await;
        }
        drop(guard);

        if let Some(live) = self.inner.registry.subscribe(user_id) {
            let live = live.borrow().clone();
            record.status = live.status;
            match live.artifact {
                Some(Artifact::Qr(qr)) => {
                    record.qr_code = Some(qr);
                    record.pairing_code = None;
                }
                Some(Artifact::PairingCode(code)) => {
                    record.pairing_code = Some(code);
                    record.qr_code = None;
                }
                None => {}
            }
        }
        Ok(record)
    }

    /// Log out and forget `user_id`'s device link.
    ///
    /// Cancels a pending reconnect in the same step that removes the
    /// registry entry. Calling it on a Disconnected user changes nothing.
    /// The protocol logout runs after the user's lock is released, so a
    /// slow logout holds up neither status reads nor a fresh start.
    pub async fn disconnect(&self, user_id: &UserId) -> Result<Disconnected, SessionError> {
        validate_user(user_id)?;
        let guard = self.inner.user_locks.lock(user_id).await;

        let Some(entry) = self.inner.registry.remove(user_id) else {
            return Ok(self.disconnect_idle(user_id).await);
        };

        log::info!("Disconnecting {} (session {})", user_id, entry.session_id);
        self.forget_credentials(user_id).await;

        let saved = self.update_record(user_id, |r| r.mark_disconnected()).await;
        self.inner
            .events
            .emit_status(user_id, SessionStatus::Disconnected, None);
        self.inner.trace.line(user_id, "DISCONNECT", "requested");
        drop(guard);

        if let Some(handle) = entry.handle {
            if let Err(e) = handle.connection.logout().await {
                log::warn!("Logout for {} failed: {}", user_id, e);
            }
            handle.connection.close();
        }
        Ok(Disconnected {
            was_active: true,
            store_degraded: !saved,
        })
    }

    /// The live connection for `user_id`, only while Connected.
    pub fn lookup_connection(&self, user_id: &UserId) -> Option<Arc<dyn Connection>> {
        self.inner.registry.lookup(user_id)
    }

    /// Try once to resume from stored credentials without issuing any new
    /// artifact. Waits up to the configured reconnect wait for the handshake.
    pub async fn reconnect_if_credentials_exist(&self, user_id: &UserId) -> bool {
        if validate_user(user_id).is_err() {
            return false;
        }
        if self.inner.registry.lookup(user_id).is_some() {
            return true;
        }

        {
            let _guard = self.inner.user_locks.lock(user_id).await;
            if !self.inner.registry.contains(user_id) {
                match self.resume_locked(user_id).await {
                    Resume::Started | Resume::AlreadyActive => {}
                    Resume::NoCredentials | Resume::Failed => return false,
                }
            }
        }

        let Some(mut live) = self.inner.registry.subscribe(user_id) else {
            return false;
        };
        let wait = self.inner.config.reconnect_wait();
        let settled = tokio::time::timeout(
            wait,
            live.wait_for(|s| s.status != SessionStatus::Connecting),
        )
        .await
        .is_ok();
        if !settled {
            log::warn!("Reconnect for {} did not complete within {:?}", user_id, wait);
        }
        self.inner.registry.lookup(user_id).is_some()
    }

    // ========================================================================
    // Observation and process lifecycle
    // ========================================================================

    /// Follow `user_id`'s live state. `None` when nothing is in flight.
    pub fn subscribe(&self, user_id: &UserId) -> Option<watch::Receiver<LiveState>> {
        self.inner.registry.subscribe(user_id)
    }

    /// Wait for the current attempt to publish an artifact.
    ///
    /// Gives up on timeout or as soon as the attempt leaves Connecting.
    pub async fn wait_for_artifact(&self, user_id: &UserId, timeout: Duration) -> Option<Artifact> {
        let mut live = self.subscribe(user_id)?;
        let result = tokio::time::timeout(
            timeout,
            live.wait_for(|s| s.artifact.is_some() || s.status != SessionStatus::Connecting),
        )
        .await;
        match result {
            Ok(Ok(state)) => state.artifact.clone(),
            _ => None,
        }
    }

    /// Resume every user whose record was left Connecting or Connected.
    pub async fn restore_sessions(&self) -> RestoreSummary {
        let records = match self.inner.sessions.list().await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Could not list sessions to restore: {}", e);
                return RestoreSummary::default();
            }
        };

        let pending: Vec<UserId> = records
            .into_iter()
            .filter(|r| r.status != SessionStatus::Disconnected)
            .map(|r| r.user_id)
            .collect();
        let outcomes = join_all(pending.iter().map(|user_id| self.restore_one(user_id))).await;

        let mut summary = RestoreSummary::default();
        for outcome in outcomes {
            match outcome {
                Resume::Started => summary.resumed += 1,
                Resume::NoCredentials => summary.reset += 1,
                Resume::Failed => summary.failed += 1,
                Resume::AlreadyActive => {}
            }
        }
        log::info!(
            "Restored sessions: {} resumed, {} reset, {} failed",
            summary.resumed,
            summary.reset,
            summary.failed
        );
        summary
    }

    /// Drop every connection without logging out, keeping credentials for
    /// the next [`ConnectionSupervisor::restore_sessions`].
    pub fn shutdown(&self) {
        for (user_id, entry) in self.inner.registry.drain() {
            if let Some(handle) = entry.handle {
                handle.connection.close();
            }
            log::debug!("Closed connection for {} on shutdown", user_id);
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    async fn credentials_for_start(
        &self,
        user_id: &UserId,
    ) -> Result<CredentialMaterial, ProtocolError> {
        match self.inner.credentials.load(user_id).await {
            Ok(Some(material)) => Ok(material),
            Ok(None) => Ok(self.fresh_credentials(user_id).await),
            Err(e) => Err(ProtocolError::CorruptCredentials(e.to_string())),
        }
    }

    async fn fresh_credentials(&self, user_id: &UserId) -> CredentialMaterial {
        let material = self.inner.protocol.fresh_credentials();
        if let Err(e) = self.inner.credentials.save(user_id, &material).await {
            log::warn!("Could not store fresh credentials for {}: {}", user_id, e);
        }
        material
    }

    async fn forget_credentials(&self, user_id: &UserId) {
        if let Err(e) = self.inner.credentials.delete(user_id).await {
            log::warn!("Could not delete credentials for {}: {}", user_id, e);
        }
    }

    /// Open a connection for `generation` and start draining its events.
    async fn open_connection(
        &self,
        user_id: &UserId,
        generation: u64,
        credentials: CredentialMaterial,
        auth: AuthRequest,
    ) -> Result<(), ProtocolError> {
        let opened = self
            .inner
            .protocol
            .open(user_id, credentials.clone(), auth)
            .await?;

        match self.inner.registry.attach(
            user_id,
            generation,
            Arc::clone(&opened.connection),
            credentials,
        ) {
            Ok(consumer) => {
                self.spawn_consumer(
                    user_id.clone(),
                    generation,
                    opened.connection,
                    opened.events,
                    consumer,
                );
                Ok(())
            }
            Err(connection) => {
                connection.close();
                Err(ProtocolError::Closed)
            }
        }
    }

    fn spawn_consumer(
        &self,
        user_id: UserId,
        generation: u64,
        connection: Arc<dyn Connection>,
        mut events: mpsc::Receiver<ProtocolEvent>,
        cancel: CancellationToken,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };
                match event {
                    Some(ProtocolEvent::InboundMessage(message)) => {
                        supervisor.dispatch(&user_id, &connection, message).await;
                    }
                    Some(ProtocolEvent::Closed { reason, terminal }) => {
                        supervisor
                            .handle_close(&user_id, generation, reason, terminal)
                            .await;
                        return;
                    }
                    Some(event) => supervisor.apply_lifecycle(&user_id, generation, event).await,
                    None => {
                        supervisor
                            .handle_close(&user_id, generation, CloseReason::ConnectionLost, false)
                            .await;
                        return;
                    }
                }
            }
        });
    }

    async fn dispatch(
        &self,
        user_id: &UserId,
        connection: &Arc<dyn Connection>,
        message: InboundMessage,
    ) {
        let Some(dispatcher) = self.inner.dispatcher.as_ref() else {
            return;
        };
        let outcome = dispatcher
            .handle(self, user_id, Some(Arc::clone(connection)), &message)
            .await;
        log::debug!("Message {} for {}: {:?}", message.id, user_id, outcome);
    }

    async fn apply_lifecycle(&self, user_id: &UserId, generation: u64, event: ProtocolEvent) {
        let _guard = self.inner.user_locks.lock(user_id).await;
        if !self.inner.registry.is_current(user_id, generation) {
            log::debug!("Ignoring event from replaced connection for {}", user_id);
            return;
        }

        match event {
            ProtocolEvent::QrIssued(qr) => {
                self.inner
                    .registry
                    .publish_artifact(user_id, generation, Artifact::Qr(qr.clone()));
                let record_qr = qr.clone();
                self.update_record(user_id, move |r| r.issue_qr(record_qr))
                    .await;
                self.inner.events.emit_qr(user_id, &qr);
                self.inner.trace.line(user_id, "QR", "issued");
            }
            ProtocolEvent::PairingCodeIssued(code) => {
                self.inner.registry.publish_artifact(
                    user_id,
                    generation,
                    Artifact::PairingCode(code.clone()),
                );
                let record_code = code.clone();
                self.update_record(user_id, move |r| r.issue_pairing_code(record_code))
                    .await;
                self.inner.events.emit_pairing_code(user_id, &code);
                self.inner.trace.line(user_id, "PAIRING", "code issued");
            }
            ProtocolEvent::Opened => {
                self.inner.registry.mark_connected(user_id, generation);
                self.update_record(user_id, |r| r.mark_connected()).await;
                let session_id = self.inner.registry.session_id(user_id);
                self.inner.events.emit_status(
                    user_id,
                    SessionStatus::Connected,
                    session_id.as_ref(),
                );
                self.inner.trace.line(user_id, "OPEN", "connected");
                log::info!("Session for {} connected", user_id);
            }
            ProtocolEvent::CredentialsRotated(material) => {
                self.inner
                    .registry
                    .update_credentials(user_id, generation, material.clone());
                if let Err(e) = self.inner.credentials.save(user_id, &material).await {
                    log::warn!("Could not store rotated credentials for {}: {}", user_id, e);
                }
                self.inner.trace.line(user_id, "CREDS", "rotated");
            }
            ProtocolEvent::Closed { .. } | ProtocolEvent::InboundMessage(_) => {}
        }
    }

    async fn handle_close(
        &self,
        user_id: &UserId,
        generation: u64,
        reason: CloseReason,
        terminal: bool,
    ) {
        let _guard = self.inner.user_locks.lock(user_id).await;
        if !self.inner.registry.is_current(user_id, generation) {
            log::debug!("Ignoring close of replaced connection for {}", user_id);
            return;
        }
        self.inner.trace.line(
            user_id,
            "CLOSE",
            &format!("{reason} (terminal: {terminal})"),
        );

        let action = match ReconnectPolicy::classify(&reason, terminal) {
            // A resume-only entry has no way to ask for a new artifact.
            CloseAction::Retry {
                fresh_credentials: true,
            } if self.inner.registry.auth(user_id).is_none() => CloseAction::Terminate {
                forget_credentials: true,
            },
            action => action,
        };

        match action {
            CloseAction::Terminate { forget_credentials } => {
                log::info!("Session for {} closed ({}), not reconnecting", user_id, reason);
                if let Some(handle) = self
                    .inner
                    .registry
                    .remove_generation(user_id, generation)
                    .and_then(|entry| entry.handle)
                {
                    handle.connection.close();
                }
                if forget_credentials {
                    self.forget_credentials(user_id).await;
                }
                self.update_record(user_id, |r| r.mark_disconnected()).await;
                self.inner
                    .events
                    .emit_status(user_id, SessionStatus::Disconnected, None);
            }
            CloseAction::Retry { fresh_credentials } => {
                let Some(ticket) = self.inner.registry.mark_reconnecting(user_id, generation)
                else {
                    return;
                };
                if fresh_credentials {
                    self.forget_credentials(user_id).await;
                }
                self.update_record(user_id, |r| r.mark_reconnecting()).await;
                let session_id = self.inner.registry.session_id(user_id);
                self.inner.events.emit_status(
                    user_id,
                    SessionStatus::Connecting,
                    session_id.as_ref(),
                );

                let delay = self.inner.policy.delay();
                log::info!(
                    "Session for {} closed ({}), reconnecting in {:?}",
                    user_id,
                    reason,
                    delay
                );
                self.inner
                    .trace
                    .line(user_id, "RECONNECT", &format!("scheduled in {delay:?}"));

                let supervisor = self.clone();
                let user = user_id.clone();
                self.inner
                    .policy
                    .schedule(ticket.shutdown.child_token(), async move {
                        supervisor
                            .reconnect_attempt(&user, generation, fresh_credentials, ticket.auth)
                            .await;
                    });
            }
        }
    }

    /// One scheduled reconnect. Replaces the previous generation's handle.
    async fn reconnect_attempt(
        &self,
        user_id: &UserId,
        previous_generation: u64,
        fresh_credentials: bool,
        auth: Option<AuthMethod>,
    ) {
        let _guard = self.inner.user_locks.lock(user_id).await;
        let Some(generation) = self
            .inner
            .registry
            .begin_attempt(user_id, previous_generation)
        else {
            log::debug!("Reconnect for {} superseded", user_id);
            return;
        };

        let stored = if fresh_credentials {
            None
        } else {
            match self.inner.credentials.load(user_id).await {
                Ok(stored) => stored,
                Err(e) => {
                    log::warn!("Could not load credentials for {}: {}", user_id, e);
                    None
                }
            }
        };

        // Registered material resumes silently. Anything else needs the
        // original artifact flow again.
        let (credentials, request) = match (stored, auth.as_ref()) {
            (Some(material), _) if material.registered => (material, AuthRequest::Resume),
            (Some(material), Some(method)) => (material, AuthRequest::from(method)),
            (None, Some(method)) => (
                self.fresh_credentials(user_id).await,
                AuthRequest::from(method),
            ),
            (_, None) => {
                self.fail_attempt(user_id, generation, "no usable credentials")
                    .await;
                return;
            }
        };

        self.inner
            .trace
            .line(user_id, "ATTEMPT", &format!("{request:?}"));
        if let Err(e) = self
            .open_connection(user_id, generation, credentials, request)
            .await
        {
            log::warn!("Reconnect for {} failed: {}", user_id, e);
            self.fail_attempt(user_id, generation, &e.to_string()).await;
        }
    }

    /// Start a resume-only attempt. Caller holds the user lock.
    async fn resume_locked(&self, user_id: &UserId) -> Resume {
        let material = match self.inner.credentials.load(user_id).await {
            Ok(Some(material)) if material.registered => material,
            Ok(_) => return Resume::NoCredentials,
            Err(e) => {
                log::warn!("Could not load credentials for {}: {}", user_id, e);
                return Resume::NoCredentials;
            }
        };

        let (session_id, generation) = match self.inner.registry.claim(user_id, None) {
            Claim::Existing(_) => return Resume::AlreadyActive,
            Claim::New {
                session_id,
                generation,
            } => (session_id, generation),
        };

        log::info!("Resuming session {} for {}", session_id, user_id);
        let record_session = session_id.clone();
        self.update_record(user_id, move |r| r.enter_connecting(record_session))
            .await;
        self.inner
            .events
            .emit_status(user_id, SessionStatus::Connecting, Some(&session_id));

        match self
            .open_connection(user_id, generation, material, AuthRequest::Resume)
            .await
        {
            Ok(()) => Resume::Started,
            Err(e) => {
                log::warn!("Resume for {} failed: {}", user_id, e);
                self.fail_attempt(user_id, generation, &e.to_string()).await;
                Resume::Failed
            }
        }
    }

    async fn restore_one(&self, user_id: &UserId) -> Resume {
        let _guard = self.inner.user_locks.lock(user_id).await;
        if self.inner.registry.contains(user_id) {
            return Resume::AlreadyActive;
        }
        let outcome = self.resume_locked(user_id).await;
        if let Resume::NoCredentials = outcome {
            log::info!("No credentials to restore {}, marking disconnected", user_id);
            self.update_record(user_id, |r| r.mark_disconnected()).await;
        }
        outcome
    }

    /// An open failed: drop the attempt and settle on Disconnected.
    async fn fail_attempt(&self, user_id: &UserId, generation: u64, detail: &str) {
        self.inner.registry.remove_generation(user_id, generation);
        self.update_record(user_id, |r| r.mark_disconnected()).await;
        self.inner
            .events
            .emit_status(user_id, SessionStatus::Disconnected, None);
        self.inner.trace.line(user_id, "FAILED", detail);
    }

    async fn disconnect_idle(&self, user_id: &UserId) -> Disconnected {
        let mut record = match self.inner.sessions.load(user_id).await {
            Ok(Some(record)) if record.status != SessionStatus::Disconnected => record,
            Ok(_) => {
                return Disconnected {
                    was_active: false,
                    store_degraded: false,
                }
            }
            Err(e) => {
                log::warn!("Could not load session for {}: {}", user_id, e);
                return Disconnected {
                    was_active: false,
                    store_degraded: true,
                };
            }
        };

        // Stale record left by a previous process.
        self.forget_credentials(user_id).await;
        record.mark_disconnected();
        let saved = self.save_record(&record).await;
        self.inner
            .events
            .emit_status(user_id, SessionStatus::Disconnected, None);
        Disconnected {
            was_active: false,
            store_degraded: !saved,
        }
    }

    // ========================================================================
    // Session records
    // ========================================================================

    async fn load_record(&self, user_id: &UserId) -> SessionRecord {
        match self.inner.sessions.load(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => SessionRecord::new(user_id.clone()),
            Err(e) => {
                log::warn!("Could not load session for {}: {}", user_id, e);
                SessionRecord::new(user_id.clone())
            }
        }
    }

    async fn save_record(&self, record: &SessionRecord) -> bool {
        match self.inner.sessions.save(record).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Session store write failed for {}: {}",
                    record.user_id,
                    e
                );
                false
            }
        }
    }

    async fn update_record<F>(&self, user_id: &UserId, apply: F) -> bool
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let mut record = self.load_record(user_id).await;
        apply(&mut record);
        self.save_record(&record).await
    }
}

#[async_trait]
impl ConnectionLookup for ConnectionSupervisor {
    fn lookup_connection(&self, user_id: &UserId) -> Option<Arc<dyn Connection>> {
        ConnectionSupervisor::lookup_connection(self, user_id)
    }

    async fn reconnect_if_credentials_exist(&self, user_id: &UserId) -> bool {
        ConnectionSupervisor::reconnect_if_credentials_exist(self, user_id).await
    }
}

fn validate_user(user_id: &UserId) -> Result<(), SessionError> {
    if user_id.as_str().trim().is_empty() {
        return Err(SessionError::client("user id required"));
    }
    validate_key(user_id)
        .map(|_| ())
        .map_err(|_| SessionError::client("invalid user id"))
}
