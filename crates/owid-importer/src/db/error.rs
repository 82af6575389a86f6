use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("cannot prepare '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value does not map onto its domain type.
    #[error("unexpected value '{value}' in column '{column}'")]
    InvalidValue { column: &'static str, value: String },

    #[error("database connection lock poisoned")]
    LockPoisoned,
}
