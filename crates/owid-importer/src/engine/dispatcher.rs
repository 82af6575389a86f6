//! Pulls queued jobs into runners under the global running-job cap.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::runner::JobRunner;
use super::EngineDeps;
use crate::broadcast::JobEvent;
use crate::db::DatabaseError;
use crate::model::JobStatus;

/// What one dispatch tick did.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing new to launch.
    Idle,
    /// The global cap is reached.
    AtCapacity,
    /// The job's owner could not be resolved; it was failed.
    Rejected(String),
    /// A runner was launched.
    Launched {
        job_id: String,
        handle: JoinHandle<()>,
    },
}

/// Removes a job from the active set when its runner task ends, however
/// it ends.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.job_id);
    }
}

pub struct Dispatcher {
    deps: EngineDeps,
    runner: Arc<JobRunner>,
    /// Jobs with a live runner in this process, including ones still
    /// between launch and their Processing transition.
    active: Arc<Mutex<HashSet<String>>>,
}

impl Dispatcher {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            runner: Arc::new(JobRunner::new(deps.clone())),
            deps,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn active_jobs(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Launches the oldest queued job not already launching, if the global
    /// cap allows it.
    pub async fn dispatch_once(&self) -> Result<DispatchOutcome, DatabaseError> {
        let cap = self.deps.config.scheduler.max_running_jobs as u64;
        let processing = self.deps.jobs.count_with_status(JobStatus::Processing)?;
        let launched = self.active_jobs().len() as u64;
        if processing.max(launched) >= cap {
            return Ok(DispatchOutcome::AtCapacity);
        }

        // Launching jobs can still read as Queued; look one past them.
        let window = self.active_jobs().len() + 1;
        let candidates = self.deps.jobs.queued(window)?;
        let job = {
            let active = self.active_jobs();
            candidates.into_iter().find(|job| {
                let launching = active.contains(&job.id);
                if launching {
                    tracing::debug!(job_id = %job.id, "Queued job is already launching");
                }
                !launching
            })
        };
        let Some(job) = job else {
            return Ok(DispatchOutcome::Idle);
        };

        let principal = match self.deps.principals.resolve(&job.params.user_id).await {
            Ok(Some(principal)) => principal,
            Ok(None) => return self.reject(&job.id, "owner not found"),
            Err(e) => return self.reject(&job.id, &format!("owner lookup failed: {}", e)),
        };

        self.active_jobs().insert(job.id.clone());
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            job_id: job.id.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            match runner.run(&job_id, principal).await {
                Ok(status) => tracing::info!(job_id = %job_id, status = %status, "Runner finished"),
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Runner stopped"),
            }
        });

        tracing::info!(job_id = %job.id, "Dispatched job");
        Ok(DispatchOutcome::Launched {
            job_id: job.id,
            handle,
        })
    }

    fn reject(&self, job_id: &str, reason: &str) -> Result<DispatchOutcome, DatabaseError> {
        tracing::warn!(job_id = %job_id, reason, "Failing job that cannot be dispatched");
        if self
            .deps
            .jobs
            .transition(job_id, &[JobStatus::Queued], JobStatus::Failed, Some(reason))?
        {
            if let Some(job) = self.deps.jobs.get(job_id)? {
                self.deps.notifier.notify(JobEvent::job(&job));
            }
        }
        Ok(DispatchOutcome::Rejected(job_id.to_string()))
    }

    /// Ticks every dispatch interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.deps.config.scheduler.dispatch_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        tracing::error!(error = %e, "Dispatch failed");
                    }
                }
            }
        }
    }
}
