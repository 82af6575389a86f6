//! Test harness wiring the fakes to a fresh database.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use owid_importer::broadcast::JobEventBroadcaster;
use owid_importer::collab::Resolution;
use owid_importer::config::Config;
use owid_importer::db::Database;
use owid_importer::engine::{EngineDeps, JobRunner, RunError};
use owid_importer::model::{JobKind, JobParams, JobStatus, OverwritePolicy, UnitStatus};
use owid_importer::publish::HashingPublisher;
use owid_importer::service::ImportService;
use owid_importer::store::{JobStore, UnitLedger};

use super::fakes::*;

/// Config with every delay shrunk to keep tests fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.dispatch_interval_ms = 10;
    config.scheduler.stall_sweep_interval_ms = 20;
    config.scheduler.stall_threshold_ms = 5_000;
    config.runner.heartbeat_reload_ms = 10;
    config.runner.token_refresh_ms = 50;
    config.runner.unit_timeout_base_ms = 2_000;
    config.runner.upload_throttle_ms = 0;
    config.runner.metadata_settle_ms = 0;
    config
}

/// A chart job: one file per country, no inner sweep.
pub fn chart_params(user_id: &str) -> JobParams {
    JobParams {
        user_id: user_id.to_string(),
        kind: JobKind::Chart,
        url: "https://ourworldindata.org/grapher/life-expectancy".to_string(),
        file_name: "$NAME, $COUNTRY.svg".to_string(),
        description: "$TITLE for $COUNTRY".to_string(),
        overwrite_policy: OverwritePolicy::All,
        import_countries: false,
        country_file_name: String::new(),
        country_description: String::new(),
        country_overwrite_policy: OverwritePolicy::All,
        generate_template: false,
        chart_parameters: None,
    }
}

/// A map job swept per region and year.
pub fn map_params(user_id: &str) -> JobParams {
    JobParams {
        user_id: user_id.to_string(),
        kind: JobKind::Map,
        url: "https://ourworldindata.org/grapher/co2".to_string(),
        file_name: "$NAME, $REGION, $YEAR.svg".to_string(),
        description: "$TITLE in $REGION, $YEAR".to_string(),
        overwrite_policy: OverwritePolicy::All,
        import_countries: false,
        country_file_name: String::new(),
        country_description: String::new(),
        country_overwrite_policy: OverwritePolicy::All,
        generate_template: false,
        chart_parameters: None,
    }
}

/// Isolated engine environment over an in-memory database.
pub struct TestHarness {
    pub db: Database,
    pub jobs: JobStore,
    pub ledger: UnitLedger,
    pub events: Arc<JobEventBroadcaster>,
    pub resolver: Arc<FakeResolver>,
    pub processor: Arc<FakeProcessor>,
    pub repository: Arc<MemoryRepository>,
    pub tokens: Arc<FakeTokens>,
    pub principals: Arc<FakePrincipals>,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_database(Database::open_in_memory().expect("Failed to open database"))
    }

    pub fn with_database(db: Database) -> Self {
        let principals = Arc::new(FakePrincipals::default());
        principals.add("u1");
        Self {
            jobs: JobStore::new(db.clone()),
            ledger: UnitLedger::new(db.clone()),
            db,
            events: Arc::new(JobEventBroadcaster::default()),
            resolver: Arc::new(FakeResolver::default()),
            processor: Arc::new(FakeProcessor::default()),
            repository: Arc::new(MemoryRepository::default()),
            tokens: Arc::new(FakeTokens::default()),
            principals,
            config: test_config(),
        }
    }

    pub fn resolve_to(&self, resolution: Resolution) {
        self.resolver.set(resolution);
    }

    pub fn deps(&self) -> EngineDeps {
        EngineDeps {
            jobs: self.jobs.clone(),
            ledger: self.ledger.clone(),
            resolver: self.resolver.clone(),
            processor: self.processor.clone(),
            publisher: Arc::new(HashingPublisher::new(self.repository.clone())),
            tokens: self.tokens.clone(),
            principals: self.principals.clone(),
            notifier: self.events.clone(),
            config: Arc::new(self.config.clone()),
        }
    }

    pub fn service(&self) -> ImportService {
        ImportService::new(
            self.jobs.clone(),
            self.ledger.clone(),
            self.events.clone(),
            Arc::new(self.config.clone()),
        )
    }

    pub fn submit(&self, params: JobParams) -> String {
        self.service().submit_job(params).expect("Failed to submit job")
    }

    /// Runs a queued job to completion as user `u1`.
    pub async fn run(&self, job_id: &str) -> Result<JobStatus, RunError> {
        JobRunner::new(self.deps()).run(job_id, principal("u1")).await
    }

    pub fn job_status(&self, job_id: &str) -> JobStatus {
        self.jobs.get(job_id).unwrap().expect("job exists").status
    }

    /// Unit statuses keyed by the unit's display form.
    pub fn unit_statuses(&self, job_id: &str) -> BTreeMap<String, UnitStatus> {
        self.ledger
            .list_by_job(job_id)
            .unwrap()
            .into_iter()
            .map(|u| (u.key.to_string(), u.status))
            .collect()
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
