pub mod loader;
pub mod schema;
pub mod variables;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{Config, LogFormat, LoggingConfig, RunnerConfig, SchedulerConfig, SourceConfig};
pub use variables::{TemplateEngine, TemplateVars};
