//! Sidecar process spawning.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::protocol::ProtocolError;

/// How to launch the protocol sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Path to the sidecar binary
    pub binary_path: String,
    /// Arguments passed before anything else
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// How long a command may wait for its reply
    pub request_timeout: Duration,
}

impl SidecarConfig {
    pub fn new(binary_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            working_dir: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A spawned sidecar with its three pipes taken.
pub(crate) struct SidecarProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

pub(crate) fn spawn(config: &SidecarConfig, label: &str) -> Result<SidecarProcess, ProtocolError> {
    let mut cmd = Command::new(&config.binary_path);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        ProtocolError::OpenFailed(format!("Failed to spawn {}: {}", config.binary_path, e))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProtocolError::OpenFailed("Failed to capture stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProtocolError::OpenFailed("Failed to capture stdout".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(stderr, label.to_string());
    }

    Ok(SidecarProcess {
        child,
        stdin,
        stdout,
    })
}

fn forward_stderr(stderr: ChildStderr, label: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[sidecar {}] {}", label, line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SidecarConfig::new("/usr/bin/wa-bridge", vec!["--quiet".to_string()]);
        assert_eq!(config.binary_path, "/usr/bin/wa-bridge");
        assert_eq!(config.args, vec!["--quiet"]);
        assert!(config.working_dir.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_overrides() {
        let config = SidecarConfig::new("bridge", vec![])
            .working_dir("/var/lib/pairlink")
            .request_timeout(Duration::from_secs(5));
        assert_eq!(config.working_dir.as_deref(), Some("/var/lib/pairlink"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_is_an_open_failure() {
        let config = SidecarConfig::new("/nonexistent/pairlink-bridge", vec![]);
        assert!(matches!(
            spawn(&config, "alice"),
            Err(ProtocolError::OpenFailed(_))
        ));
    }
}
