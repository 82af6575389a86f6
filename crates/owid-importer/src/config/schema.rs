use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// SQLite file. Defaults to `~/.owid-importer/data/importer.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            scheduler: SchedulerConfig::default(),
            runner: RunnerConfig::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Process-wide background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// Global cap on simultaneously Processing jobs.
    #[serde(default = "default_max_running_jobs")]
    pub max_running_jobs: usize,
    #[serde(default = "default_stall_sweep_interval_ms")]
    pub stall_sweep_interval_ms: u64,
    /// Heartbeat age after which a Processing job is presumed dead.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,
}

fn default_dispatch_interval_ms() -> u64 {
    10_000
}

fn default_max_running_jobs() -> usize {
    2
}

fn default_stall_sweep_interval_ms() -> u64 {
    60_000
}

fn default_stall_threshold_ms() -> u64 {
    300_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_running_jobs: default_max_running_jobs(),
            stall_sweep_interval_ms: default_stall_sweep_interval_ms(),
            stall_threshold_ms: default_stall_threshold_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn stall_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.stall_sweep_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

/// Settings of one job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Partitions processed concurrently within one job.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    #[serde(default = "default_heartbeat_reload_ms")]
    pub heartbeat_reload_ms: u64,
    #[serde(default = "default_token_refresh_ms")]
    pub token_refresh_ms: u64,
    /// Attempts per unit before it is recorded as Failed.
    #[serde(default = "default_unit_attempts")]
    pub unit_attempts: u32,
    /// Timeout of the first attempt; attempt `n` gets `n` times this.
    #[serde(default = "default_unit_timeout_base_ms")]
    pub unit_timeout_base_ms: u64,
    /// Pause after every publish to stay under the repository's rate limits.
    #[serde(default = "default_upload_throttle_ms")]
    pub upload_throttle_ms: u64,
    /// Pause before the aggregated metadata re-upload of a partition.
    #[serde(default = "default_metadata_settle_ms")]
    pub metadata_settle_ms: u64,
    #[serde(default = "default_upload_comment")]
    pub upload_comment: String,
}

fn default_fan_out() -> usize {
    3
}

fn default_heartbeat_reload_ms() -> u64 {
    5_000
}

fn default_token_refresh_ms() -> u64 {
    60_000
}

fn default_unit_attempts() -> u32 {
    2
}

fn default_unit_timeout_base_ms() -> u64 {
    60_000
}

fn default_upload_throttle_ms() -> u64 {
    2_000
}

fn default_metadata_settle_ms() -> u64 {
    10_000
}

fn default_upload_comment() -> String {
    "Importing from Our World in Data".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            heartbeat_reload_ms: default_heartbeat_reload_ms(),
            token_refresh_ms: default_token_refresh_ms(),
            unit_attempts: default_unit_attempts(),
            unit_timeout_base_ms: default_unit_timeout_base_ms(),
            upload_throttle_ms: default_upload_throttle_ms(),
            metadata_settle_ms: default_metadata_settle_ms(),
            upload_comment: default_upload_comment(),
        }
    }
}

impl RunnerConfig {
    pub fn heartbeat_reload(&self) -> Duration {
        Duration::from_millis(self.heartbeat_reload_ms)
    }

    pub fn token_refresh(&self) -> Duration {
        Duration::from_millis(self.token_refresh_ms)
    }

    /// Timeout for the given 1-based attempt.
    pub fn unit_timeout(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.unit_timeout_base_ms.saturating_mul(u64::from(attempt.max(1))))
    }

    pub fn upload_throttle(&self) -> Duration {
        Duration::from_millis(self.upload_throttle_ms)
    }

    pub fn metadata_settle(&self) -> Duration {
        Duration::from_millis(self.metadata_settle_ms)
    }
}

/// Where charts come from and how companion pages are named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Title of the gallery template page; supports the job's template variables.
    #[serde(default = "default_template_title")]
    pub template_title: String,
}

fn default_base_url() -> String {
    "https://ourworldindata.org/grapher/".to_string()
}

fn default_template_title() -> String {
    "Template:OWID/$NAME".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            template_title: default_template_title(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
