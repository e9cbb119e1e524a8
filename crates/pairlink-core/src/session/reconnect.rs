//! Close classification and the delayed, cancellable reconnect timer.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{CloseReason, ProtocolEvent};

/// What the state machine does after a connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Go to Disconnected. `forget_credentials` when the device was unlinked.
    Terminate { forget_credentials: bool },
    /// Go back to Connecting and retry after the delay.
    /// `fresh_credentials` when the stored material was rejected.
    Retry { fresh_credentials: bool },
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn classify(reason: &CloseReason, terminal: bool) -> CloseAction {
        if ProtocolEvent::is_terminal_close(reason, terminal) {
            return CloseAction::Terminate {
                forget_credentials: *reason == CloseReason::LoggedOut,
            };
        }
        CloseAction::Retry {
            fresh_credentials: *reason == CloseReason::CredentialsRejected,
        }
    }

    /// Run `attempt` after the delay unless `cancel` fires first.
    pub fn schedule<F>(&self, cancel: CancellationToken, attempt: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Pending reconnect cancelled");
                }
                _ = tokio::time::sleep(delay) => attempt.await,
            }
        })
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
