//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration
//! runs in its own transaction together with its bookkeeping row, so a
//! failed migration leaves the schema at the previous version.

use chrono::Utc;
use rusqlite::{params, Connection};

use super::error::DatabaseError;
use super::format_timestamp;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "jobs",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "unit ledger",
        sql: include_str!("sql/002_create_units.sql"),
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    log::info!(
        "Applying schema v{} ({})",
        migration.version,
        migration.description
    );

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)
        .map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.description,
            format_timestamp(Utc::now())
        ],
    )?;
    tx.commit()?;
    Ok(())
}
