use chrono::Utc;

use crate::db::unit_repo::{self, UnitKeyRef, UnitRow};
use crate::db::{format_timestamp, Database, DatabaseError};
use crate::model::{Unit, UnitKey, UnitKind, UnitStatus};

/// Outcome of asking the ledger for permission to process a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// A previous pass already finished this unit; do not redo it.
    Completed(Unit),
    /// The unit is now Processing and owned by the caller.
    Claimed { unit: Unit, existed: bool },
}

/// Durable per-unit progress.
#[derive(Clone)]
pub struct UnitLedger {
    db: Database,
}

impl UnitLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the entry for `key`, creating it in Processing if absent,
    /// and whether it existed before.
    pub fn find_or_create(&self, job_id: &str, key: &UnitKey) -> Result<(Unit, bool), DatabaseError> {
        let key_ref = UnitKeyRef {
            job_id,
            kind: key.kind.as_str(),
            partition_key: &key.partition,
            step_key: key.step_key(),
        };
        let now = format_timestamp(Utc::now());
        let (row, existed) =
            unit_repo::find_or_insert(&self.db, &key_ref, UnitStatus::Processing.as_str(), &now)?;
        Ok((Unit::try_from(row)?, existed))
    }

    /// Decides whether `key` must be processed.
    ///
    /// A terminal-success entry is left alone unless `force` is set. Any
    /// other entry (failed, or in flight from a dead run) is moved back
    /// to Processing.
    pub fn claim(&self, job_id: &str, key: &UnitKey, force: bool) -> Result<Claim, DatabaseError> {
        let (mut unit, existed) = self.find_or_create(job_id, key)?;
        if existed && unit.status.is_success() && !force {
            return Ok(Claim::Completed(unit));
        }
        if unit.status != UnitStatus::Processing {
            unit.status = UnitStatus::Processing;
            self.update(&unit)?;
        }
        Ok(Claim::Claimed { unit, existed })
    }

    /// Persists the latest file name, status and fill data of a unit.
    pub fn update(&self, unit: &Unit) -> Result<(), DatabaseError> {
        let payload = if unit.fills.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&unit.fills).map_err(|e| DatabaseError::InvalidValue {
                    column: "payload",
                    value: e.to_string(),
                })?,
            )
        };
        let now = format_timestamp(Utc::now());
        unit_repo::update(
            &self.db,
            &UnitRow {
                id: unit.id,
                job_id: unit.job_id.clone(),
                kind: unit.key.kind.as_str().to_string(),
                partition_key: unit.key.partition.clone(),
                step_key: unit.key.step_key().to_string(),
                file_name: unit.file_name.clone(),
                status: unit.status.as_str().to_string(),
                payload,
                created_at: now.clone(),
                updated_at: now,
            },
        )
    }

    pub fn list_by_job(&self, job_id: &str) -> Result<Vec<Unit>, DatabaseError> {
        unit_repo::list_by_job(&self.db, job_id)?
            .into_iter()
            .map(Unit::try_from)
            .collect()
    }

    /// Every step recorded for one partition of a job.
    pub fn list_by_partition(
        &self,
        job_id: &str,
        kind: UnitKind,
        partition: &str,
    ) -> Result<Vec<Unit>, DatabaseError> {
        unit_repo::list_by_partition(&self.db, job_id, kind.as_str(), partition)?
            .into_iter()
            .map(Unit::try_from)
            .collect()
    }

    /// Marks units a dead run left in flight as Failed so the next pass
    /// redoes them. Returns how many were changed.
    pub fn fail_in_flight(&self, job_id: &str) -> Result<usize, DatabaseError> {
        let from: Vec<&str> = UnitStatus::IN_FLIGHT.iter().map(UnitStatus::as_str).collect();
        unit_repo::update_status_where(
            &self.db,
            job_id,
            &from,
            UnitStatus::Failed.as_str(),
            &format_timestamp(Utc::now()),
        )
    }
}
