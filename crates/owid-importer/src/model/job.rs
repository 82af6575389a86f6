//! Jobs: one user-submitted import request and its lifecycle.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{parse_column, text_enum};
use crate::config::variables::{chart_parameter_vars, TemplateEngine};
use crate::db::job_repo::JobRow;
use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::error::ValidationError;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

text_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Done => "done",
    Failed => "failed",
});

impl JobStatus {
    /// Done and Failed jobs may be retried.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// What kind of visualization a job imports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A world map swept per region and year, optionally followed by countries.
    #[default]
    Map,
    /// A line chart rendered once per country.
    Chart,
}

text_enum!(JobKind {
    Map => "map",
    Chart => "chart",
});

/// How an existing remote description is treated when new content lands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Replace the whole description.
    #[default]
    All,
    /// Replace the description but keep category tags already present.
    AllExceptCategories,
    /// Keep the remote description; only the file content is replaced.
    OnlyFile,
}

text_enum!(OverwritePolicy {
    All => "all",
    AllExceptCategories => "all_except_categories",
    OnlyFile => "only_file",
});

/// Parameters supplied at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub user_id: String,
    #[serde(default)]
    pub kind: JobKind,
    pub url: String,
    pub file_name: String,
    pub description: String,
    #[serde(default)]
    pub overwrite_policy: OverwritePolicy,
    #[serde(default)]
    pub import_countries: bool,
    #[serde(default)]
    pub country_file_name: String,
    #[serde(default)]
    pub country_description: String,
    #[serde(default)]
    pub country_overwrite_policy: OverwritePolicy,
    #[serde(default)]
    pub generate_template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_parameters: Option<String>,
}

impl JobParams {
    /// Checks the parameters and returns the chart name embedded in the URL.
    pub fn validate(&self, base_url: &str) -> Result<String, ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::Empty("url"));
        }
        let chart_name = chart_name_from_url(&self.url, base_url).ok_or_else(|| {
            ValidationError::UnrecognizedSource {
                url: self.url.clone(),
                base: base_url.to_string(),
            }
        })?;

        let params = chart_parameter_vars(self.chart_parameters.as_deref());
        TemplateEngine::check("file_name", &self.file_name, &params)?;
        TemplateEngine::check("description", &self.description, &params)?;

        match self.kind {
            JobKind::Map => {
                require_variable("file_name", &self.file_name, "YEAR")?;
                require_variable("file_name", &self.file_name, "REGION")?;
            }
            JobKind::Chart => require_variable("file_name", &self.file_name, "COUNTRY")?,
        }

        if self.imports_countries() {
            TemplateEngine::check("country_file_name", &self.country_file_name, &params)?;
            TemplateEngine::check("country_description", &self.country_description, &params)?;
            require_variable("country_file_name", &self.country_file_name, "COUNTRY")?;
        }

        Ok(chart_name)
    }

    /// Whether this job renders per-country artifacts in a secondary phase.
    pub fn imports_countries(&self) -> bool {
        self.kind == JobKind::Map && self.import_countries
    }

    /// File name template, description template and policy for country units.
    pub fn country_templates(&self) -> (&str, &str, OverwritePolicy) {
        match self.kind {
            JobKind::Chart => (&self.file_name, &self.description, self.overwrite_policy),
            JobKind::Map => (
                &self.country_file_name,
                &self.country_description,
                self.country_overwrite_policy,
            ),
        }
    }
}

/// File names must vary per unit or uploads would overwrite each other.
fn require_variable(
    field: &'static str,
    template: &str,
    variable: &'static str,
) -> Result<(), ValidationError> {
    if TemplateEngine::variables(template).iter().any(|v| v == variable) {
        Ok(())
    } else {
        Err(ValidationError::MissingVariable { field, variable })
    }
}

/// Extracts the chart slug from `<base><slug>[?query]`.
pub fn chart_name_from_url(url: &str, base_url: &str) -> Option<String> {
    let pattern = format!(r"^{}([-a-z_0-9]+)(\?.*)?$", regex::escape(base_url));
    let re = Regex::new(&pattern).ok()?;
    re.captures(url.trim()).map(|caps| caps[1].to_string())
}

/// A job as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(flatten)]
    pub params: JobParams,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_operation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Builds a fresh Queued job.
    pub fn new(params: JobParams, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            status: JobStatus::Queued,
            chart_name: None,
            template_name: None,
            error: None,
            last_operation_at: now,
            created_at: now,
        }
    }

    pub fn to_row(&self) -> JobRow {
        let p = &self.params;
        JobRow {
            id: self.id.clone(),
            user_id: p.user_id.clone(),
            kind: p.kind.as_str().to_string(),
            url: p.url.clone(),
            file_name: p.file_name.clone(),
            description: p.description.clone(),
            overwrite_policy: p.overwrite_policy.as_str().to_string(),
            import_countries: p.import_countries,
            country_file_name: p.country_file_name.clone(),
            country_description: p.country_description.clone(),
            country_overwrite_policy: p.country_overwrite_policy.as_str().to_string(),
            generate_template: p.generate_template,
            chart_parameters: p.chart_parameters.clone(),
            chart_name: self.chart_name.clone(),
            template_name: self.template_name.clone(),
            status: self.status.as_str().to_string(),
            error: self.error.clone(),
            last_operation_at: format_timestamp(self.last_operation_at),
            created_at: format_timestamp(self.created_at),
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            params: JobParams {
                user_id: row.user_id,
                kind: parse_column("kind", &row.kind)?,
                url: row.url,
                file_name: row.file_name,
                description: row.description,
                overwrite_policy: parse_column("overwrite_policy", &row.overwrite_policy)?,
                import_countries: row.import_countries,
                country_file_name: row.country_file_name,
                country_description: row.country_description,
                country_overwrite_policy: parse_column(
                    "country_overwrite_policy",
                    &row.country_overwrite_policy,
                )?,
                generate_template: row.generate_template,
                chart_parameters: row.chart_parameters,
            },
            status: parse_column("status", &row.status)?,
            chart_name: row.chart_name,
            template_name: row.template_name,
            error: row.error,
            last_operation_at: parse_timestamp("last_operation_at", &row.last_operation_at)?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            id: row.id,
        })
    }
}
