//! Reaps jobs whose runner stopped refreshing the heartbeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{JobEvent, Notifier};
use crate::db::DatabaseError;
use crate::model::JobStatus;
use crate::store::JobStore;

pub struct StallMonitor {
    jobs: JobStore,
    notifier: Arc<dyn Notifier>,
    threshold: Duration,
    interval: Duration,
}

impl StallMonitor {
    pub fn new(
        jobs: JobStore,
        notifier: Arc<dyn Notifier>,
        threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            notifier,
            threshold,
            interval,
        }
    }

    /// Fails every Processing job whose heartbeat is older than the
    /// threshold at `now`. Returns the IDs this sweep transitioned; a job
    /// already moved by someone else is not reported again.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<String>, DatabaseError> {
        let mut reaped = Vec::new();
        for job in self.jobs.list_stalled(self.threshold, now)? {
            let reason = format!(
                "stalled: no progress since {}",
                job.last_operation_at.to_rfc3339()
            );
            if self
                .jobs
                .transition(&job.id, &[JobStatus::Processing], JobStatus::Failed, Some(&reason))?
            {
                tracing::warn!(job_id = %job.id, last_operation_at = %job.last_operation_at, "Marked stalled job as failed");
                if let Some(updated) = self.jobs.get(&job.id)? {
                    self.notifier.notify(JobEvent::job(&updated));
                }
                reaped.push(job.id);
            }
        }
        Ok(reaped)
    }

    /// Sweeps every interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stall monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()) {
                        tracing::error!(error = %e, "Stall sweep failed");
                    }
                }
            }
        }
    }
}
