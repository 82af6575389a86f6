//! Process-level wiring: one database, the stores over it, the event
//! broadcaster, the request surface and the engine.

use std::path::PathBuf;
use std::sync::Arc;

use crate::broadcast::JobEventBroadcaster;
use crate::collab::{
    MediaRepository, PartitionResolver, PrincipalResolver, TokenProvider, UnitProcessor,
};
use crate::config::Config;
use crate::db::{default_database_path, Database};
use crate::engine::{Engine, EngineDeps, EngineHandle};
use crate::error::{ConfigError, Result};
use crate::publish::HashingPublisher;
use crate::service::ImportService;
use crate::store::{JobStore, UnitLedger};

/// External clients the engine drives.
pub struct Collaborators {
    pub resolver: Arc<dyn PartitionResolver>,
    pub processor: Arc<dyn UnitProcessor>,
    pub repository: Arc<dyn MediaRepository>,
    pub tokens: Arc<dyn TokenProvider>,
    pub principals: Arc<dyn PrincipalResolver>,
}

pub struct ImporterApp {
    service: ImportService,
    events: Arc<JobEventBroadcaster>,
    engine: Engine,
}

impl ImporterApp {
    /// Opens the configured database and wires every component to it.
    pub fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        let path = database_path(&config)?;
        let db = Database::open(&path)?;
        tracing::info!(path = %path.display(), "Importer database opened");
        Ok(Self::with_database(db, config, collaborators))
    }

    pub fn with_database(db: Database, config: Config, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let jobs = JobStore::new(db.clone());
        let ledger = UnitLedger::new(db);
        let events = Arc::new(JobEventBroadcaster::default());

        let service = ImportService::new(
            jobs.clone(),
            ledger.clone(),
            events.clone(),
            Arc::clone(&config),
        );
        let engine = Engine::new(EngineDeps {
            jobs,
            ledger,
            resolver: collaborators.resolver,
            processor: collaborators.processor,
            publisher: Arc::new(HashingPublisher::new(collaborators.repository)),
            tokens: collaborators.tokens,
            principals: collaborators.principals,
            notifier: events.clone(),
            config,
        });

        Self {
            service,
            events,
            engine,
        }
    }

    pub fn service(&self) -> &ImportService {
        &self.service
    }

    pub fn events(&self) -> &Arc<JobEventBroadcaster> {
        &self.events
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Starts the dispatcher and stall monitor.
    pub fn start(&self) -> EngineHandle {
        self.engine.start()
    }
}

/// The configured database file, or the per-user default.
pub fn database_path(config: &Config) -> Result<PathBuf> {
    if let Some(path) = &config.database_path {
        return Ok(PathBuf::from(path));
    }
    default_database_path().ok_or_else(|| {
        ConfigError::Validation {
            message: "database_path is unset and no home directory was found".to_string(),
        }
        .into()
    })
}
