//! Units: the indivisible pieces of work tracked by the ledger.

use serde::{Deserialize, Serialize};

use super::{parse_column, text_enum};
use crate::db::unit_repo::UnitRow;
use crate::db::DatabaseError;

/// Which phase a unit belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// One region (partition) at one year (step) of a map.
    Map,
    /// One country.
    Country,
}

text_enum!(UnitKind {
    Map => "map",
    Country => "country",
});

/// Progress of one unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Processing,
    Uploaded,
    Overwritten,
    Skipped,
    DescriptionUpdated,
    Retrying,
    Failed,
}

text_enum!(UnitStatus {
    Processing => "processing",
    Uploaded => "uploaded",
    Overwritten => "overwritten",
    Skipped => "skipped",
    DescriptionUpdated => "description_updated",
    Retrying => "retrying",
    Failed => "failed",
});

impl UnitStatus {
    /// Terminal statuses that mean the artifact is in place remotely.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UnitStatus::Uploaded
                | UnitStatus::Overwritten
                | UnitStatus::Skipped
                | UnitStatus::DescriptionUpdated
        )
    }

    /// Statuses a live run passes through. Left behind only by a dead run.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, UnitStatus::Processing | UnitStatus::Retrying)
    }

    pub const IN_FLIGHT: [UnitStatus; 2] = [UnitStatus::Processing, UnitStatus::Retrying];
}

/// Identity of a unit within its job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct UnitKey {
    pub kind: UnitKind,
    pub partition: String,
    /// Position in the partition's inner sweep (a year), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl UnitKey {
    pub fn new(kind: UnitKind, partition: impl Into<String>, step: Option<String>) -> Self {
        Self {
            kind,
            partition: partition.into(),
            step,
        }
    }

    /// Stored form of the step; the empty string stands for "no step".
    pub fn step_key(&self) -> &str {
        self.step.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{}:{}/{}", self.kind, self.partition, step),
            None => write!(f, "{}:{}", self.kind, self.partition),
        }
    }
}

/// Fill colour of one leaf area (a country) on a rendered map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeafFill {
    pub country: String,
    pub fill: String,
}

/// A ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: i64,
    pub job_id: String,
    #[serde(flatten)]
    pub key: UnitKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub status: UnitStatus,
    /// Per-leaf fill data carried forward for the partition's metadata block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<LeafFill>,
}

impl TryFrom<UnitRow> for Unit {
    type Error = DatabaseError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let fills = match row.payload.as_deref() {
            None | Some("") => Vec::new(),
            Some(json) => {
                serde_json::from_str(json).map_err(|_| DatabaseError::InvalidValue {
                    column: "payload",
                    value: json.to_string(),
                })?
            }
        };
        let step = (!row.step_key.is_empty()).then_some(row.step_key);
        Ok(Self {
            id: row.id,
            key: UnitKey {
                kind: parse_column("kind", &row.kind)?,
                partition: row.partition_key,
                step,
            },
            file_name: row.file_name,
            status: parse_column("status", &row.status)?,
            fills,
            job_id: row.job_id,
        })
    }
}
