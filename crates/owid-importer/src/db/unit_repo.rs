//! Unit repository: the per-partition progress ledger in the `units` table.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw unit row from the database.
#[derive(Debug, Clone)]
pub struct UnitRow {
    pub id: i64,
    pub job_id: String,
    pub kind: String,
    pub partition_key: String,
    pub step_key: String,
    pub file_name: Option<String>,
    pub status: String,
    pub payload: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UnitRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            kind: row.get("kind")?,
            partition_key: row.get("partition_key")?,
            step_key: row.get("step_key")?,
            file_name: row.get("file_name")?,
            status: row.get("status")?,
            payload: row.get("payload")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Composite identity of a unit row.
#[derive(Debug, Clone, Copy)]
pub struct UnitKeyRef<'a> {
    pub job_id: &'a str,
    pub kind: &'a str,
    pub partition_key: &'a str,
    pub step_key: &'a str,
}

fn select_by_key(conn: &Connection, key: &UnitKeyRef<'_>) -> Result<Option<UnitRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM units
             WHERE job_id = ?1 AND kind = ?2 AND partition_key = ?3 AND step_key = ?4",
            params![key.job_id, key.kind, key.partition_key, key.step_key],
            UnitRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds the row for `key`, inserting it with `status` if absent.
///
/// Returns the row and whether it already existed. Lookup and insert run
/// under a single lock acquisition.
pub fn find_or_insert(
    db: &Database,
    key: &UnitKeyRef<'_>,
    status: &str,
    now: &str,
) -> Result<(UnitRow, bool), DatabaseError> {
    db.with_conn(|conn| {
        if let Some(row) = select_by_key(conn, key)? {
            return Ok((row, true));
        }

        conn.execute(
            "INSERT INTO units (job_id, kind, partition_key, step_key, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![key.job_id, key.kind, key.partition_key, key.step_key, status, now],
        )?;

        let row = select_by_key(conn, key)?.ok_or(DatabaseError::Sqlite(
            rusqlite::Error::QueryReturnedNoRows,
        ))?;
        Ok((row, false))
    })
}

/// Persists file name, status and payload of an existing row.
pub fn update(db: &Database, unit: &UnitRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE units SET file_name = ?2, status = ?3, payload = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                unit.id,
                unit.file_name,
                unit.status,
                unit.payload,
                unit.updated_at
            ],
        )?;
        Ok(())
    })
}

/// Lists every unit of a job in creation order.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<UnitRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM units WHERE job_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_id], UnitRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists the units of one partition (every step of it) in creation order.
pub fn list_by_partition(
    db: &Database,
    job_id: &str,
    kind: &str,
    partition_key: &str,
) -> Result<Vec<UnitRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM units WHERE job_id = ?1 AND kind = ?2 AND partition_key = ?3
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id, kind, partition_key], UnitRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves every unit of a job whose status is in `from` to `to`.
/// Returns the number of rows changed.
pub fn update_status_where(
    db: &Database,
    job_id: &str,
    from: &[&str],
    to: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    if from.is_empty() {
        return Ok(0);
    }
    db.with_conn(|conn| {
        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE units SET status = ?2, updated_at = ?3 WHERE job_id = ?1 AND status IN ({})",
            placeholders
        );
        let mut values: Vec<&str> = vec![job_id, to, now];
        values.extend_from_slice(from);
        Ok(conn.execute(&sql, params_from_iter(values))?)
    })
}
