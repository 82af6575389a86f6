//! Bounded fan-out over a job's outer partitions.

use std::future::Future;

use tokio::task::JoinSet;

use super::cancel::CancelSignal;
use super::UnitError;
use crate::collab::Partition;

/// A partition whose processing returned an error.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition: String,
    pub error: UnitError,
}

/// What one fan-out pass did.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub launched: usize,
    /// Partitions never started because the job was cancelled.
    pub not_launched: usize,
    pub failures: Vec<PartitionFailure>,
}

/// Runs partitions with at most `limit` in flight at once.
///
/// Failures are isolated: every launched partition runs to completion and
/// its error, if any, is collected in the report.
pub struct FanOutExecutor {
    limit: usize,
}

impl FanOutExecutor {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub async fn run<F, Fut>(
        &self,
        partitions: Vec<Partition>,
        cancel: &CancelSignal,
        work: F,
    ) -> FanOutReport
    where
        F: Fn(Partition) -> Fut,
        Fut: Future<Output = Result<(), UnitError>> + Send + 'static,
    {
        let mut report = FanOutReport::default();
        let mut pending = partitions.into_iter();
        let mut in_flight: JoinSet<(String, Result<(), UnitError>)> = JoinSet::new();
        let mut stopped = false;

        loop {
            while !stopped && in_flight.len() < self.limit {
                let Some(partition) = pending.next() else {
                    break;
                };
                if cancel.refresh() {
                    report.not_launched = 1 + pending.len();
                    stopped = true;
                    tracing::info!(
                        not_launched = report.not_launched,
                        "Job cancelled; not launching remaining partitions"
                    );
                    break;
                }

                let key = partition.key.clone();
                let fut = work(partition);
                in_flight.spawn(async move { (key, fut.await) });
                report.launched += 1;
            }

            match in_flight.join_next().await {
                None => break,
                Some(Ok((_, Ok(())))) => {}
                Some(Ok((partition, Err(error)))) => {
                    tracing::warn!(partition = %partition, error = %error, "Partition failed");
                    report.failures.push(PartitionFailure { partition, error });
                }
                Some(Err(join_error)) => {
                    tracing::error!(error = %join_error, "Partition task aborted");
                    report.failures.push(PartitionFailure {
                        partition: "<unknown>".to_string(),
                        error: UnitError::Aborted(join_error.to_string()),
                    });
                }
            }
        }

        report
    }
}
