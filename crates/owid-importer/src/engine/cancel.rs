//! Cooperative cancellation of a running job.
//!
//! Nothing in flight is ever interrupted. A job is cancelled by moving it
//! out of Processing in the store; the run notices when the heartbeat
//! loop or the executor's pre-launch check reloads the record, and then
//! stops starting new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::JobStatus;
use crate::store::JobStore;

#[derive(Clone)]
pub struct CancelSignal {
    job_id: String,
    jobs: JobStore,
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new(job_id: impl Into<String>, jobs: JobStore) -> Self {
        Self {
            job_id: job_id.into(),
            jobs,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Last observed state, without touching the store.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reloads the job record and latches cancellation once it has left
    /// Processing. Storage errors are logged and treated as "still running".
    pub fn refresh(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let stopped = match self.jobs.get(&self.job_id) {
            Ok(Some(job)) => job.status != JobStatus::Processing,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to reload job status");
                false
            }
        };
        if stopped {
            self.cancelled.store(true, Ordering::Release);
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::{JobKind, JobParams, OverwritePolicy};

    fn job_store() -> (JobStore, String) {
        let jobs = JobStore::new(Database::open_in_memory().unwrap());
        let job = jobs
            .create(JobParams {
                user_id: "u1".to_string(),
                kind: JobKind::Chart,
                url: "https://ourworldindata.org/grapher/co2".to_string(),
                file_name: "$COUNTRY".to_string(),
                description: "d".to_string(),
                overwrite_policy: OverwritePolicy::All,
                import_countries: false,
                country_file_name: String::new(),
                country_description: String::new(),
                country_overwrite_policy: OverwritePolicy::All,
                generate_template: false,
                chart_parameters: None,
            })
            .unwrap();
        jobs.update_status(&job.id, JobStatus::Processing, None).unwrap();
        (jobs, job.id)
    }

    #[test]
    fn test_refresh_latches_external_failure() {
        let (jobs, id) = job_store();
        let signal = CancelSignal::new(&id, jobs.clone());
        assert!(!signal.refresh());

        jobs.update_status(&id, JobStatus::Failed, Some("cancelled")).unwrap();
        assert!(!signal.is_cancelled());
        assert!(signal.refresh());
        assert!(signal.is_cancelled());

        // Latched even if the record changes again.
        jobs.update_status(&id, JobStatus::Processing, None).unwrap();
        assert!(signal.refresh());
    }

    #[test]
    fn test_missing_job_counts_as_cancelled() {
        let (jobs, _) = job_store();
        assert!(CancelSignal::new("gone", jobs).refresh());
    }
}
