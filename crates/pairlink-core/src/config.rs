//! Supervisor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the connection supervisor.
///
/// Durations are expressed in whole seconds so the struct round-trips
/// cleanly through JSON or CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Wait before reopening after a transient close.
    pub reconnect_delay_secs: u64,
    /// How long `reconnect_if_credentials_exist` waits for the handshake.
    pub reconnect_wait_secs: u64,
    /// Caller-side budget for a QR artifact to show up.
    pub qr_timeout_secs: u64,
    /// Caller-side budget for a pairing code to show up.
    pub pairing_timeout_secs: u64,
    /// Directory for per-user connection trace files.
    pub trace_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 5,
            reconnect_wait_secs: 10,
            qr_timeout_secs: 60,
            pairing_timeout_secs: 40,
            trace_dir: None,
        }
    }
}

impl SupervisorConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }

    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }
}
