//! Pairlink daemon.
//!
//! Wires the file stores, the sidecar protocol client, the supervisor and
//! the HTTP server together, restores sessions left over from the previous
//! run, and serves until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use pairlink_core::bridge::{SidecarClient, SidecarConfig};
use pairlink_core::features::ForwardToSelf;
use pairlink_core::jobs::{spawn_periodic, PresenceSweep};
use pairlink_core::paths;
use pairlink_core::persistence::{FileCredentialStore, FileSessionStore};
use pairlink_core::{ConnectionSupervisor, InboundDispatcher, SupervisorConfig};
use pairlink_http::SharedState;

/// Pairlink - per-user linked messaging sessions behind an HTTP API
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
struct DaemonConfig {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the HTTP server
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Data directory for sessions and credentials (default: ~/.pairlink)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Sidecar binary that speaks the messaging protocol
    #[arg(long)]
    bridge: String,

    /// Extra argument for the sidecar (repeatable)
    #[arg(long = "bridge-arg", allow_hyphen_values = true)]
    bridge_args: Vec<String>,

    /// Seconds to wait before reconnecting after a transient close
    #[arg(long, default_value_t = 5)]
    reconnect_delay_secs: u64,

    /// Seconds between presence sweeps
    #[arg(long, default_value_t = 300)]
    presence_interval_secs: u64,

    /// Log filter, e.g. "debug" or "pairlink_core=trace" (default: RUST_LOG or info)
    #[arg(long)]
    log_level: Option<String>,

    /// Write per-user connection traces under <data-dir>/traces
    #[arg(long)]
    trace: bool,
}

impl DaemonConfig {
    fn resolve_data_dir(&self) -> Result<PathBuf, String> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::default_data_dir(),
        }
    }

    fn supervisor_config(&self, data_dir: &std::path::Path) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_delay_secs: self.reconnect_delay_secs,
            trace_dir: self.trace.then(|| data_dir.join("traces")),
            ..SupervisorConfig::default()
        }
    }
}

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

#[tokio::main]
async fn main() {
    let config = DaemonConfig::parse();
    init_logging(config.log_level.as_deref());

    if let Err(e) = run(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: DaemonConfig) -> Result<(), String> {
    let data_dir = config.resolve_data_dir()?;
    log::info!("Using data directory {}", data_dir.display());

    let sessions = Arc::new(FileSessionStore::new(&data_dir));
    let credentials = Arc::new(FileCredentialStore::new(&data_dir));
    let protocol = Arc::new(SidecarClient::new(SidecarConfig::new(
        config.bridge.clone(),
        config.bridge_args.clone(),
    )));
    let dispatcher = Arc::new(InboundDispatcher::new(Arc::new(ForwardToSelf::new())));

    let supervisor = ConnectionSupervisor::builder(protocol, sessions.clone(), credentials)
        .config(config.supervisor_config(&data_dir))
        .dispatcher(dispatcher)
        .build();

    supervisor.restore_sessions().await;

    let jobs = CancellationToken::new();
    let sweep = spawn_periodic(
        Duration::from_secs(config.presence_interval_secs.max(1)),
        Arc::new(PresenceSweep::new(supervisor.clone(), sessions)),
        jobs.clone(),
    );

    let state = Arc::new(SharedState::new(supervisor.clone()));
    let mut server = pairlink_http::start(state, &config.host, config.port).await?;

    shutdown_signal().await;

    server.stop().await;
    jobs.cancel();
    if let Err(e) = sweep.await {
        log::warn!("Presence sweep ended abnormally: {}", e);
    }
    supervisor.shutdown();
    log::info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down"),
        _ = terminate => log::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DaemonConfig {
        DaemonConfig::try_parse_from(std::iter::once("pairlink-daemon").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&["--bridge", "wa-bridge"]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8787);
        assert_eq!(config.reconnect_delay_secs, 5);
        assert!(config.bridge_args.is_empty());
        assert!(config.data_dir.is_none());
        assert!(!config.trace);
    }

    #[test]
    fn bridge_is_required() {
        assert!(DaemonConfig::try_parse_from(["pairlink-daemon"]).is_err());
    }

    #[test]
    fn bridge_args_repeat_and_may_look_like_flags() {
        let config = parse(&[
            "--bridge",
            "node",
            "--bridge-arg",
            "bridge.js",
            "--bridge-arg",
            "--quiet",
        ]);
        assert_eq!(config.bridge_args, vec!["bridge.js", "--quiet"]);
    }

    #[test]
    fn supervisor_config_follows_flags() {
        let config = parse(&[
            "--bridge",
            "wa-bridge",
            "--data-dir",
            "/srv/pairlink",
            "--reconnect-delay-secs",
            "2",
            "--trace",
        ]);
        let data_dir = config.resolve_data_dir().unwrap();
        assert_eq!(data_dir, PathBuf::from("/srv/pairlink"));

        let supervisor = config.supervisor_config(&data_dir);
        assert_eq!(supervisor.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(
            supervisor.trace_dir,
            Some(PathBuf::from("/srv/pairlink/traces"))
        );
        assert_eq!(supervisor.qr_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn tracing_is_off_by_default() {
        let config = parse(&["--bridge", "wa-bridge", "--data-dir", "/tmp/p"]);
        assert!(config
            .supervisor_config(&config.resolve_data_dir().unwrap())
            .trace_dir
            .is_none());
    }
}
