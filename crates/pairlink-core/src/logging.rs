//! Per-user connection trace files.
//!
//! When a trace directory is configured, lifecycle lines for each user are
//! appended to `<trace_dir>/<user>.log`. Callers only enqueue; a single
//! writer task owns the files, so lines land in the order they were
//! produced. Tracing is strictly best effort: a missing directory or a
//! failed write is ignored.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::session::UserId;

enum TraceCommand {
    Append { user_id: UserId, line: String },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
pub struct TraceLog {
    tx: Option<mpsc::UnboundedSender<TraceCommand>>,
}

impl TraceLog {
    /// Start tracing into `dir`. Needs a tokio runtime for the writer
    /// task; without one tracing stays off.
    pub fn new(dir: Option<PathBuf>) -> Self {
        let Some(dir) = dir else {
            return Self::disabled();
        };
        let Ok(handle) = Handle::try_current() else {
            log::warn!(
                "No async runtime available, connection tracing to {} disabled",
                dir.display()
            );
            return Self::disabled();
        };

        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(write_loop(dir, rx));
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `[timestamp] KIND: data` for the user's trace file.
    pub fn line(&self, user_id: &UserId, kind: &str, data: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let _ = tx.send(TraceCommand::Append {
            user_id: user_id.clone(),
            line: format!("[{}] {}: {}\n", ts, kind, data),
        });
    }

    /// Wait until every line queued so far has been written.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(TraceCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn write_loop(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<TraceCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            TraceCommand::Append { user_id, line } => {
                if let Err(e) = append_line(&dir, &user_id, &line).await {
                    log::debug!("Trace write failed for {}: {}", user_id, e);
                }
            }
            TraceCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append_line(dir: &Path, user_id: &UserId, line: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{user_id}.log")))
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn disabled_trace_writes_nothing() {
        let trace = TraceLog::disabled();
        assert!(!trace.is_enabled());
        trace.line(&UserId::new("alice"), "OPEN", "ignored");
        trace.flush().await;
    }

    #[test]
    fn tracing_stays_off_outside_a_runtime() {
        let dir = tempdir().unwrap();
        let trace = TraceLog::new(Some(dir.path().to_path_buf()));
        assert!(!trace.is_enabled());
    }

    #[tokio::test]
    async fn line_appends_timestamped_entries() {
        let dir = tempdir().unwrap();
        let trace = TraceLog::new(Some(dir.path().to_path_buf()));

        trace.line(&UserId::new("alice"), "QR", "issued");
        trace.line(&UserId::new("alice"), "OPEN", "connected");
        trace.flush().await;

        let contents = std::fs::read_to_string(dir.path().join("alice.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("QR: issued"));
        assert!(lines[1].ends_with("OPEN: connected"));
        // RFC 3339 with millis and Z suffix
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("Z]"));
    }

    #[tokio::test]
    async fn users_get_separate_files() {
        let dir = tempdir().unwrap();
        let trace = TraceLog::new(Some(dir.path().to_path_buf()));

        trace.line(&UserId::new("alice"), "OPEN", "a");
        trace.line(&UserId::new("bob"), "OPEN", "b");
        trace.flush().await;

        assert!(dir.path().join("alice.log").exists());
        assert!(dir.path().join("bob.log").exists());
    }

    #[tokio::test]
    async fn line_returns_before_the_file_is_written() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("traces");
        let trace = TraceLog::new(Some(nested.clone()));

        for i in 0..100 {
            trace.line(&UserId::new("alice"), "MSG", &i.to_string());
        }
        // Nothing has been awaited yet, so the writer task has not run.
        assert!(!nested.exists());

        trace.flush().await;
        let contents = std::fs::read_to_string(nested.join("alice.log")).unwrap();
        let order: Vec<_> = contents
            .lines()
            .map(|l| l.rsplit(": ").next().unwrap().to_string())
            .collect();
        let expected: Vec<_> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(order, expected);
    }
}
