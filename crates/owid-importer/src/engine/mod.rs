//! The orchestration engine: dispatcher, stall monitor, job runner and the
//! bounded fan-out underneath it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Notifier;
use crate::collab::{
    CollaboratorError, PartitionResolver, PrincipalResolver, TokenProvider, UnitProcessor,
};
use crate::config::Config;
use crate::db::DatabaseError;
use crate::publish::{PublishError, Publisher};
use crate::store::{JobStore, UnitLedger};

pub mod cancel;
pub mod dispatcher;
pub mod executor;
pub mod gallery;
pub mod monitor;
pub mod runner;
mod unit;

pub use cancel::CancelSignal;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use executor::{FanOutExecutor, FanOutReport, PartitionFailure};
pub use monitor::StallMonitor;
pub use runner::{JobRunner, RunError};

/// Failure of one unit or partition. Recorded on the unit, never fatal
/// to the job.
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("ledger update failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("partition task aborted: {0}")]
    Aborted(String),
}

impl UnitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UnitError::Timeout(_) => true,
            UnitError::Collaborator(e) => e.is_retryable(),
            UnitError::Publish(e) => e.is_retryable(),
            UnitError::Database(_) | UnitError::Aborted(_) => false,
        }
    }
}

/// Shared dependencies of every engine component.
#[derive(Clone)]
pub struct EngineDeps {
    pub jobs: JobStore,
    pub ledger: UnitLedger,
    pub resolver: Arc<dyn PartitionResolver>,
    pub processor: Arc<dyn UnitProcessor>,
    pub publisher: Arc<dyn Publisher>,
    pub tokens: Arc<dyn TokenProvider>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

/// The dispatcher and stall monitor, wired to the same dependencies.
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<StallMonitor>,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        let monitor = StallMonitor::new(
            deps.jobs.clone(),
            Arc::clone(&deps.notifier),
            deps.config.scheduler.stall_threshold(),
            deps.config.scheduler.stall_sweep_interval(),
        );
        Self {
            dispatcher: Arc::new(Dispatcher::new(deps)),
            monitor: Arc::new(monitor),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &Arc<StallMonitor> {
        &self.monitor
    }

    /// Starts both background loops. They run until the handle is shut down.
    pub fn start(&self) -> EngineHandle {
        let shutdown = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(&self.dispatcher).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.monitor).run(shutdown.clone())),
        ];
        tracing::info!("Engine started");
        EngineHandle { shutdown, tasks }
    }
}

/// Running background loops.
pub struct EngineHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stops the loops and waits for them. Jobs already launched keep running.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Engine loop ended abnormally");
            }
        }
    }
}
