//! Restore outbox worker
//!
//! Drains due `RestoreJob`s through the restorer. Failed jobs back off
//! exponentially and are marked dead after the configured number of attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use netbill_core::isolation::RestoreJobStatus;
use netbill_core::ledger::LedgerStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::restore::Restorer;

/// Configuration for the restore worker
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with every failure
    pub base_delay: chrono::Duration,
    /// How often the worker looks for due jobs when nobody wakes it
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: chrono::Duration::seconds(30),
            poll_interval: Duration::from_secs(30),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub done: usize,
    pub retried: usize,
    pub dead: usize,
}

pub struct RestoreWorker {
    ledger: Arc<dyn LedgerStore>,
    restorer: Arc<Restorer>,
    config: OutboxConfig,
    signal: Arc<Notify>,
}

impl RestoreWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        restorer: Arc<Restorer>,
        config: OutboxConfig,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            ledger,
            restorer,
            config,
            signal,
        }
    }

    /// Run every job that is due now
    pub async fn drain_once(&self) -> Result<DrainSummary> {
        let jobs = self
            .ledger
            .due_restore_jobs(Utc::now(), self.config.batch_size)
            .await?;
        let mut summary = DrainSummary::default();

        for mut job in jobs {
            match self.restorer.restore(job.owner_id, &job.username).await {
                Ok(outcome) => {
                    debug!(
                        job_id = %job.id,
                        username = %job.username,
                        profile = outcome.profile.as_deref().unwrap_or("-"),
                        "Restore job done"
                    );
                    job.mark_done();
                    summary.done += 1;
                }
                Err(err) => {
                    job.mark_failed(err.to_string(), self.config.max_attempts, self.config.base_delay);
                    if job.status == RestoreJobStatus::Dead {
                        error!(
                            job_id = %job.id,
                            username = %job.username,
                            attempts = job.attempts,
                            error = %err,
                            "Restore job gave up"
                        );
                        summary.dead += 1;
                    } else {
                        warn!(
                            job_id = %job.id,
                            username = %job.username,
                            attempts = job.attempts,
                            next_attempt_at = %job.next_attempt_at,
                            error = %err,
                            "Restore job failed, will retry"
                        );
                        summary.retried += 1;
                    }
                }
            }
            self.ledger.update_restore_job(job).await?;
        }

        if summary != DrainSummary::default() {
            info!(
                done = summary.done,
                retried = summary.retried,
                dead = summary.dead,
                "Restore outbox drained"
            );
        }
        Ok(summary)
    }
}

/// Drain the outbox whenever a job is queued, and on a fixed interval
pub fn start_restore_worker(worker: Arc<RestoreWorker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = worker.drain_once().await {
                error!(error = %err, "Restore outbox drain failed");
            }
            tokio::select! {
                _ = worker.signal.notified() => {}
                _ = tokio::time::sleep(worker.config.poll_interval) => {}
            }
        }
    })
}
