use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid job parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Malformed job parameters. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' must not be empty")]
    Empty(&'static str),

    #[error("'{url}' is not a chart URL under {base}")]
    UnrecognizedSource { url: String, base: String },

    #[error("'{field}' uses unknown variable ${variable}")]
    UnknownVariable { field: &'static str, variable: String },

    #[error("'{field}' must contain ${variable} so every file gets its own name")]
    MissingVariable {
        field: &'static str,
        variable: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ImporterError>;
