use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::{format_timestamp, job_repo, Database, DatabaseError};
use crate::model::{Job, JobParams, JobStatus};

/// Durable job records.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores a new Queued job.
    pub fn create(&self, params: JobParams) -> Result<Job, DatabaseError> {
        let job = Job::new(params, Utc::now());
        job_repo::insert(&self.db, &job.to_row())?;
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?
            .map(Job::try_from)
            .transpose()
    }

    /// Last-write-wins status update.
    pub fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        job_repo::update_status(&self.db, id, status.as_str(), error)
    }

    /// Moves the job to `to` only if it is currently in one of `from`.
    /// Returns whether the transition happened.
    pub fn transition(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let from: Vec<&str> = from.iter().map(JobStatus::as_str).collect();
        job_repo::update_status_if(&self.db, id, &from, to.as_str(), error)
    }

    pub fn touch_heartbeat(&self, id: &str) -> Result<(), DatabaseError> {
        self.touch_heartbeat_at(id, Utc::now())
    }

    pub fn touch_heartbeat_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        job_repo::touch(&self.db, id, &format_timestamp(at))
    }

    /// Processing jobs whose heartbeat is at least `threshold` older than `now`.
    pub fn list_stalled(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, DatabaseError> {
        let cutoff = now - chrono::Duration::milliseconds(threshold.as_millis() as i64);
        job_repo::list_stale(
            &self.db,
            JobStatus::Processing.as_str(),
            &format_timestamp(cutoff),
        )?
        .into_iter()
        .map(Job::try_from)
        .collect()
    }

    pub fn count_with_status(&self, status: JobStatus) -> Result<u64, DatabaseError> {
        job_repo::count_by_status(&self.db, status.as_str())
    }

    /// Up to `limit` Queued jobs, FIFO by creation time.
    pub fn queued(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        job_repo::list_with_status(&self.db, JobStatus::Queued.as_str(), limit)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<Job>, DatabaseError> {
        job_repo::list_by_user(&self.db, user_id)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// Stores what a run learned about the job (chart name, template page).
    pub fn record_details(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::update_details(
            &self.db,
            &job.id,
            job.chart_name.as_deref(),
            job.template_name.as_deref(),
        )
    }
}
