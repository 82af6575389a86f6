//! Resumable import engine for Our World in Data charts and maps.
//!
//! Jobs are queued durably, pulled by a dispatcher under a global cap and
//! driven by a runner that fans out over regions or countries. Every unit
//! of work is tracked in a ledger so a retried job skips what already
//! succeeded and redoes only what failed.

pub mod app;
pub mod broadcast;
pub mod collab;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod publish;
pub mod service;
pub mod store;

pub use app::{Collaborators, ImporterApp};
pub use broadcast::{JobEvent, JobEventBroadcaster, Notifier, SubscriberRegistry};
pub use config::{load_config, Config, TemplateEngine};
pub use db::Database;
pub use engine::{Engine, EngineDeps, EngineHandle, JobRunner, RunError, StallMonitor};
pub use error::{ConfigError, ImporterError, Result, ValidationError};
pub use logging::init_logging;
pub use model::{Job, JobKind, JobParams, JobStatus, OverwritePolicy, Unit, UnitKey, UnitStatus};
pub use publish::{HashingPublisher, PublishOutcome, Publisher};
pub use service::{ImportService, JobView, ServiceError};
pub use store::{JobStore, UnitLedger};
