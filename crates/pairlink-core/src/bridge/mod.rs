//! Protocol client backed by a sidecar process.
//!
//! The messaging protocol itself lives in an external program. Each
//! connection is one sidecar process: the `open` command goes to its stdin
//! first, then lifecycle events and command replies come back on stdout as
//! JSON lines (see [`wire`]). When the process exits without a `close`
//! event the event stream simply ends.

mod process;
pub mod wire;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    AuthRequest, Connection, CredentialMaterial, MediaRef, OpenedConnection, OutboundContent,
    ProtocolClient, ProtocolError, ProtocolEvent,
};
use crate::session::UserId;

pub use process::SidecarConfig;
use wire::{BridgeCommand, BridgeMessage, Reply};

/// Buffered protocol events per connection.
const EVENT_BUFFER: usize = 256;

pub struct SidecarClient {
    config: SidecarConfig,
}

impl SidecarClient {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    fn fresh_credentials(&self) -> CredentialMaterial {
        // The sidecar initialises empty material itself.
        CredentialMaterial::new(serde_json::Value::Null)
    }

    async fn open(
        &self,
        user_id: &UserId,
        credentials: CredentialMaterial,
        auth: AuthRequest,
    ) -> Result<OpenedConnection, ProtocolError> {
        let process::SidecarProcess {
            child,
            mut stdin,
            stdout,
        } = process::spawn(&self.config, user_id.as_str())?;

        let open = BridgeCommand::Open {
            user_id: user_id.to_string(),
            credentials,
            auth,
        }
        .to_line()?;
        stdin
            .write_all(open.as_bytes())
            .await
            .map_err(|e| ProtocolError::OpenFailed(format!("Failed to write open: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ProtocolError::OpenFailed(format!("Failed to write open: {e}")))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared::default());
        let closed = CancellationToken::new();
        spawn_reader(
            user_id.clone(),
            child,
            stdout,
            tx,
            Arc::clone(&shared),
            closed.clone(),
        );

        log::debug!("Sidecar started for {}", user_id);
        Ok(OpenedConnection {
            connection: Arc::new(SidecarConnection {
                stdin: AsyncMutex::new(stdin),
                shared,
                next_id: AtomicU64::new(1),
                closed,
                request_timeout: self.config.request_timeout,
            }),
            events: rx,
        })
    }
}

/// State shared between a connection and its stdout reader.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    account: Mutex<Option<String>>,
}

pub struct SidecarConnection {
    stdin: AsyncMutex<ChildStdin>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl SidecarConnection {
    /// Send a command built around a fresh request id and wait for its reply.
    async fn request(&self, build: impl FnOnce(u64) -> BridgeCommand) -> Result<Reply, ProtocolError> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = build(id).to_line()?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(ProtocolError::Timeout(format!("request {id}")))
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), ProtocolError> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ProtocolError::Closed)?;
        stdin.flush().await.map_err(|_| ProtocolError::Closed)
    }
}

#[async_trait]
impl Connection for SidecarConnection {
    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<(), ProtocolError> {
        let content: wire::WireContent = content.into();
        self.request(|id| BridgeCommand::Send {
            id,
            chat_id: chat_id.to_string(),
            content,
        })
        .await?
        .into_result()
        .map(|_| ())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.request(|id| BridgeCommand::Download {
            id,
            media: media.clone(),
        })
        .await?
        .into_bytes()
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.request(|id| BridgeCommand::Logout { id })
            .await?
            .into_result()
            .map(|_| ())
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn account_chat_id(&self) -> Option<String> {
        self.shared.account.lock().clone()
    }
}

/// Drain stdout until the process exits or the connection is closed.
fn spawn_reader(
    user_id: UserId,
    mut child: Child,
    stdout: ChildStdout,
    events: mpsc::Sender<ProtocolEvent>,
    shared: Arc<Shared>,
    closed: CancellationToken,
) {
    // Replies are routed inline; events go through an unbounded queue so
    // a slow consumer never delays a reply.
    let (queue, pending_events) = mpsc::unbounded_channel();
    spawn_forwarder(pending_events, events, closed.clone());

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = closed.cancelled() => {
                    if let Err(e) = child.kill().await {
                        log::debug!("Failed to kill sidecar for {}: {}", user_id, e);
                    }
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Sidecar stdout for {} failed: {}", user_id, e);
                    break;
                }
            };
            let Some(message) = wire::parse_line(&line) else {
                continue;
            };

            match message {
                BridgeMessage::Reply(reply) => {
                    if let Some(waiter) = shared.pending.lock().remove(&reply.id) {
                        let _ = waiter.send(reply);
                    }
                }
                message => {
                    if let BridgeMessage::Open {
                        account: Some(account),
                    } = &message
                    {
                        *shared.account.lock() = Some(account.clone());
                    }
                    if let Some(event) = message.into_event() {
                        // Fails only once the forwarder has given up.
                        let _ = queue.send(event);
                    }
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => log::debug!("Sidecar for {} exited: {}", user_id, status),
            Ok(None) => {
                let _ = child.start_kill();
            }
            Err(e) => log::debug!("Sidecar status for {} unknown: {}", user_id, e),
        }
        // Dropping the waiters fails every outstanding request with Closed.
        shared.pending.lock().clear();
    });
}

/// Move queued events to the connection's bounded channel in order. The
/// channel ends once the reader is gone and the queue is drained.
fn spawn_forwarder(
    mut queue: mpsc::UnboundedReceiver<ProtocolEvent>,
    events: mpsc::Sender<ProtocolEvent>,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                sent = events.send(event) => {
                    if sent.is_err() {
                        // Nobody consumes events any more.
                        closed.cancel();
                        break;
                    }
                }
            }
        }
    });
}
