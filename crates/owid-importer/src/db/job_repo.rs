//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, params_from_iter, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub url: String,
    pub file_name: String,
    pub description: String,
    pub overwrite_policy: String,
    pub import_countries: bool,
    pub country_file_name: String,
    pub country_description: String,
    pub country_overwrite_policy: String,
    pub generate_template: bool,
    pub chart_parameters: Option<String>,
    pub chart_name: Option<String>,
    pub template_name: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub last_operation_at: String,
    pub created_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            url: row.get("url")?,
            file_name: row.get("file_name")?,
            description: row.get("description")?,
            overwrite_policy: row.get("overwrite_policy")?,
            import_countries: row.get("import_countries")?,
            country_file_name: row.get("country_file_name")?,
            country_description: row.get("country_description")?,
            country_overwrite_policy: row.get("country_overwrite_policy")?,
            generate_template: row.get("generate_template")?,
            chart_parameters: row.get("chart_parameters")?,
            chart_name: row.get("chart_name")?,
            template_name: row.get("template_name")?,
            status: row.get("status")?,
            error: row.get("error")?,
            last_operation_at: row.get("last_operation_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, user_id, kind, url, file_name, description, overwrite_policy,
             import_countries, country_file_name, country_description, country_overwrite_policy,
             generate_template, chart_parameters, chart_name, template_name, status, error,
             last_operation_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                job.id,
                job.user_id,
                job.kind,
                job.url,
                job.file_name,
                job.description,
                job.overwrite_policy,
                job.import_countries,
                job.country_file_name,
                job.country_description,
                job.country_overwrite_policy,
                job.generate_template,
                job.chart_parameters,
                job.chart_name,
                job.template_name,
                job.status,
                job.error,
                job.last_operation_at,
                job.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates the fields a run discovers about a job. Status and heartbeat
/// have their own narrower updates so concurrent writers do not clobber them.
pub fn update_details(
    db: &Database,
    id: &str,
    chart_name: Option<&str>,
    template_name: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET chart_name = ?2, template_name = ?3 WHERE id = ?1",
            params![id, chart_name, template_name],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists the jobs of one user, newest first.
pub fn list_by_user(db: &Database, user_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists up to `limit` jobs with the given status, oldest first.
pub fn list_with_status(
    db: &Database,
    status: &str,
    limit: usize,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs with the given status whose heartbeat is at or before `before`.
pub fn list_stale(
    db: &Database,
    status: &str,
    before: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1 AND last_operation_at <= ?2
             ORDER BY last_operation_at ASC",
        )?;
        let rows = stmt
            .query_map(params![status, before], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Unconditionally sets status and error of a job.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2, error = ?3 WHERE id = ?1",
            params![id, status, error],
        )?;
        Ok(())
    })
}

/// Sets status and error only while the job is in one of `expected`.
///
/// Returns whether the row changed. This is the compare-and-set every
/// racing actor (runner, stall monitor, cancellation, retry) goes through.
pub fn update_status_if(
    db: &Database,
    id: &str,
    expected: &[&str],
    status: &str,
    error: Option<&str>,
) -> Result<bool, DatabaseError> {
    if expected.is_empty() {
        return Ok(false);
    }
    db.with_conn(|conn| {
        let placeholders = (0..expected.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE jobs SET status = ?2, error = ?3 WHERE id = ?1 AND status IN ({})",
            placeholders
        );
        let mut values: Vec<Option<&str>> = vec![Some(id), Some(status), error];
        values.extend(expected.iter().map(|s| Some(*s)));
        let changed = conn.execute(&sql, params_from_iter(values))?;
        Ok(changed > 0)
    })
}

/// Refreshes the heartbeat timestamp of a job.
pub fn touch(db: &Database, id: &str, at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET last_operation_at = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}
