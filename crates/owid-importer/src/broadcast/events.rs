//! Job and unit change events pushed to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Job, Unit};

/// A change to a job or one of its units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Full snapshot of the job record after a status or detail change.
    Job {
        job: Job,
        timestamp: DateTime<Utc>,
    },
    /// Snapshot of one ledger entry after it changed.
    #[serde(rename_all = "camelCase")]
    Unit {
        job_id: String,
        unit: Unit,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job(job: &Job) -> Self {
        JobEvent::Job {
            job: job.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn unit(unit: &Unit) -> Self {
        JobEvent::Unit {
            job_id: unit.job_id.clone(),
            unit: unit.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Job { job, .. } => &job.id,
            JobEvent::Unit { job_id, .. } => job_id,
        }
    }
}

/// Fire-and-forget delivery of job events.
///
/// Implementations must never fail the caller; undeliverable events are
/// dropped.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: JobEvent);
}

/// Notifier that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: JobEvent) {}
}
