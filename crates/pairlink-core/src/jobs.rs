//! Periodic background jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::persistence::SessionStore;
use crate::session::{ConnectionSupervisor, SessionStatus};

#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), String>;
}

/// Run `job` every `period` until `cancel` fires. The first run is immediate.
pub fn spawn_periodic(
    period: Duration,
    job: Arc<dyn PeriodicJob>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = job.run().await {
                log::warn!("Job {} failed: {}", job.name(), e);
            }
        }
        log::debug!("Job {} stopped", job.name());
    })
}

/// Refreshes `last_seen` for every user with a live connection.
pub struct PresenceSweep {
    supervisor: ConnectionSupervisor,
    sessions: Arc<dyn SessionStore>,
}

impl PresenceSweep {
    pub fn new(supervisor: ConnectionSupervisor, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            supervisor,
            sessions,
        }
    }
}

#[async_trait]
impl PeriodicJob for PresenceSweep {
    fn name(&self) -> &str {
        "presence-sweep"
    }

    async fn run(&self) -> Result<(), String> {
        let records = self.sessions.list().await.map_err(|e| e.to_string())?;
        let mut touched = 0;
        for record in records {
            if record.status != SessionStatus::Connected {
                continue;
            }
            if self.supervisor.lookup_connection(&record.user_id).is_none() {
                continue;
            }
            if self.supervisor.get_status(&record.user_id).await.is_ok() {
                touched += 1;
            }
        }
        log::debug!("Presence sweep refreshed {} session(s)", touched);
        Ok(())
    }
}
