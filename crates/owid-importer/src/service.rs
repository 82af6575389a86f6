//! Request surface: submit, inspect, retry and cancel jobs.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::broadcast::{JobEvent, Notifier};
use crate::config::Config;
use crate::db::DatabaseError;
use crate::error::ValidationError;
use crate::model::{Job, JobParams, JobStatus, Unit};
use crate::store::{JobStore, UnitLedger};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ValidationError),

    #[error("cannot {action} job '{id}' while it is {status}")]
    InvalidStateTransition {
        id: String,
        action: &'static str,
        status: JobStatus,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ServiceError {
    /// Stable response code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidParameters(_) => "invalid_parameters",
            ServiceError::InvalidStateTransition { .. } => "invalid_state_transition",
            ServiceError::Database(_) => "internal",
        }
    }
}

/// A job together with its ledger, failed units included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job: Job,
    pub units: Vec<Unit>,
}

#[derive(Clone)]
pub struct ImportService {
    jobs: JobStore,
    ledger: UnitLedger,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl ImportService {
    pub fn new(
        jobs: JobStore,
        ledger: UnitLedger,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            jobs,
            ledger,
            notifier,
            config,
        }
    }

    /// Validates and queues a new job. Returns its ID.
    pub fn submit_job(&self, params: JobParams) -> Result<String, ServiceError> {
        params.validate(&self.config.source.base_url)?;
        let job = self.jobs.create(params)?;
        tracing::info!(job_id = %job.id, user_id = %job.params.user_id, "Job submitted");
        self.notifier.notify(JobEvent::job(&job));
        Ok(job.id)
    }

    pub fn get_job(&self, id: &str) -> Result<JobView, ServiceError> {
        let job = self.load(id)?;
        let units = self.ledger.list_by_job(id)?;
        Ok(JobView { job, units })
    }

    /// Jobs of one user, newest first.
    pub fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, ServiceError> {
        Ok(self.jobs.list_by_user(user_id)?)
    }

    /// Puts a Done or Failed job back in the queue under the same ID.
    ///
    /// Units a dead run left in flight are marked Failed first so the next
    /// pass redoes them; successful units are kept and will be skipped.
    pub fn retry_job(&self, id: &str) -> Result<(), ServiceError> {
        let job = self.load(id)?;
        if !job.status.is_finished() {
            return Err(ServiceError::InvalidStateTransition {
                id: id.to_string(),
                action: "retry",
                status: job.status,
            });
        }

        let reset = self.ledger.fail_in_flight(id)?;
        if !self.jobs.transition(
            id,
            &[JobStatus::Failed, JobStatus::Done],
            JobStatus::Queued,
            None,
        )? {
            return Err(self.state_error(id, "retry"));
        }
        self.jobs.touch_heartbeat(id)?;
        tracing::info!(job_id = %id, reset_units = reset, "Job queued for retry");
        self.notify(id)?;
        Ok(())
    }

    /// Cooperatively cancels a Processing job by failing it. Units already
    /// running finish; no new ones start.
    pub fn cancel_job(&self, id: &str) -> Result<(), ServiceError> {
        let job = self.load(id)?;
        if job.status != JobStatus::Processing {
            return Err(ServiceError::InvalidStateTransition {
                id: id.to_string(),
                action: "cancel",
                status: job.status,
            });
        }
        if !self.jobs.transition(
            id,
            &[JobStatus::Processing],
            JobStatus::Failed,
            Some("cancelled by user"),
        )? {
            return Err(self.state_error(id, "cancel"));
        }
        tracing::info!(job_id = %id, "Job cancelled");
        self.notify(id)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Job, ServiceError> {
        self.jobs
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Error for a transition that lost a race with another actor.
    fn state_error(&self, id: &str, action: &'static str) -> ServiceError {
        match self.load(id) {
            Ok(job) => ServiceError::InvalidStateTransition {
                id: id.to_string(),
                action,
                status: job.status,
            },
            Err(e) => e,
        }
    }

    fn notify(&self, id: &str) -> Result<(), ServiceError> {
        let job = self.load(id)?;
        self.notifier.notify(JobEvent::job(&job));
        Ok(())
    }
}
