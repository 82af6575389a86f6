use std::path::Path;

use crate::config::schema::Config;
use crate::config::variables::TemplateEngine;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let scheduler = &config.scheduler;
    if scheduler.max_running_jobs == 0 {
        return Err(invalid("scheduler.max_running_jobs must be at least 1"));
    }
    if scheduler.dispatch_interval_ms == 0 || scheduler.stall_sweep_interval_ms == 0 {
        return Err(invalid("scheduler intervals must be positive"));
    }

    let runner = &config.runner;
    if runner.fan_out == 0 {
        return Err(invalid("runner.fan_out must be at least 1"));
    }
    if runner.unit_attempts == 0 {
        return Err(invalid("runner.unit_attempts must be at least 1"));
    }
    if runner.heartbeat_reload_ms == 0
        || runner.token_refresh_ms == 0
        || runner.unit_timeout_base_ms == 0
    {
        return Err(invalid("runner intervals and timeouts must be positive"));
    }
    if scheduler.stall_threshold_ms <= runner.heartbeat_reload_ms {
        return Err(invalid(format!(
            "scheduler.stall_threshold_ms ({}) must exceed runner.heartbeat_reload_ms ({})",
            scheduler.stall_threshold_ms, runner.heartbeat_reload_ms
        )));
    }
    let longest_silence = runner
        .unit_timeout(runner.unit_attempts)
        .saturating_add(runner.metadata_settle());
    if u128::from(scheduler.stall_threshold_ms) <= longest_silence.as_millis() {
        return Err(invalid(format!(
            "scheduler.stall_threshold_ms ({}) must exceed the longest unit attempt plus metadata settle ({} ms)",
            scheduler.stall_threshold_ms,
            longest_silence.as_millis()
        )));
    }

    if config.source.base_url.trim().is_empty() {
        return Err(invalid("source.base_url must not be empty"));
    }
    let unknown: Vec<String> = TemplateEngine::variables(&config.source.template_title)
        .into_iter()
        .filter(|v| !crate::config::variables::BUILTIN_VARIABLES.contains(&v.as_str()))
        .collect();
    if config.source.template_title.trim().is_empty() || !unknown.is_empty() {
        return Err(invalid(format!(
            "source.template_title '{}' is empty or uses unknown variables",
            config.source.template_title
        )));
    }

    Ok(())
}
