//! Processing of one partition: its inner sweep, per-unit retries and the
//! aggregated metadata refresh.

use std::sync::Arc;

use tracing::Instrument;

use super::cancel::CancelSignal;
use super::gallery::metadata_block;
use super::{EngineDeps, UnitError};
use crate::broadcast::JobEvent;
use crate::collab::{Partition, SharedContext, TokenCell, UnitRequest};
use crate::config::variables::{chart_parameter_vars, TemplateEngine, TemplateVars};
use crate::model::{Job, JobKind, LeafFill, OverwritePolicy, Unit, UnitKey, UnitKind, UnitStatus};
use crate::publish::{PublishOutcome, PublishRequest};
use crate::store::Claim;

/// Everything one job run shares between its partitions.
pub(crate) struct RunContext {
    pub deps: EngineDeps,
    pub job: Job,
    pub context: SharedContext,
    pub token: TokenCell,
    pub cancel: CancelSignal,
}

impl RunContext {
    fn heartbeat(&self) {
        if let Err(e) = self.deps.jobs.touch_heartbeat(&self.job.id) {
            tracing::warn!(error = %e, "Failed to refresh heartbeat");
        }
    }

    fn record(&self, unit: &Unit) -> Result<(), UnitError> {
        self.deps.ledger.update(unit)?;
        self.deps.notifier.notify(JobEvent::unit(unit));
        Ok(())
    }

    fn templates(&self, kind: UnitKind) -> (&str, &str, OverwritePolicy) {
        match kind {
            UnitKind::Map => (
                &self.job.params.file_name,
                &self.job.params.description,
                self.job.params.overwrite_policy,
            ),
            UnitKind::Country => self.job.params.country_templates(),
        }
    }

    fn vars(&self, key: &UnitKey, label: &str) -> TemplateVars {
        let (region, country) = match key.kind {
            UnitKind::Map => (Some(label.to_string()), None),
            UnitKind::Country => (Some(label.to_string()), Some(label.to_string())),
        };
        TemplateVars {
            url: self.job.params.url.clone(),
            name: self.job.chart_name.clone().unwrap_or_default(),
            title: self.context.title.clone(),
            year: key.step.clone(),
            region,
            country,
            start_year: self.context.start_year.clone(),
            end_year: self.context.end_year.clone(),
            params: chart_parameter_vars(self.job.params.chart_parameters.as_deref()),
        }
    }
}

/// How a unit visit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitRun {
    /// A previous pass had already finished it.
    Reused(UnitStatus),
    Processed(UnitStatus),
}

/// Unit kind used for a job's primary partitions.
pub(crate) fn primary_kind(kind: JobKind) -> UnitKind {
    match kind {
        JobKind::Map => UnitKind::Map,
        JobKind::Chart => UnitKind::Country,
    }
}

/// Runs a partition's steps strictly in order, then refreshes its anchor
/// step with the aggregated metadata if the sweep did any new work.
///
/// Step failures do not stop the sweep; the first one is returned.
pub(crate) async fn process_partition(
    ctx: Arc<RunContext>,
    partition: Partition,
    kind: UnitKind,
) -> Result<(), UnitError> {
    let span = tracing::info_span!("partition", partition = %partition.key, kind = %kind);
    async move {
        let steps: Vec<Option<String>> = if partition.steps.is_empty() {
            vec![None]
        } else {
            partition.steps.iter().cloned().map(Some).collect()
        };

        let mut first_error = None;
        let mut did_work = false;
        for step in steps {
            if ctx.cancel.refresh() {
                tracing::info!("Job cancelled; stopping sweep");
                return first_error.map_or(Ok(()), Err);
            }
            let key = UnitKey::new(kind, partition.key.clone(), step);
            match process_unit(&ctx, key, &partition.label, None, false).await {
                Ok(UnitRun::Processed(_)) => did_work = true,
                Ok(UnitRun::Reused(_)) => {}
                Err(e) => {
                    did_work = true;
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(anchor) = partition.metadata_anchor.as_deref() {
            if did_work && !ctx.cancel.refresh() {
                if let Err(e) = refresh_metadata(&ctx, &partition, kind, anchor).await {
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
    .instrument(span)
    .await
}

async fn refresh_metadata(
    ctx: &RunContext,
    partition: &Partition,
    kind: UnitKind,
    anchor: &str,
) -> Result<(), UnitError> {
    let settle = ctx.deps.config.runner.metadata_settle();
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
        if ctx.cancel.refresh() {
            tracing::info!("Job cancelled while settling; skipping metadata refresh");
            return Ok(());
        }
    }

    let units = ctx
        .deps
        .ledger
        .list_by_partition(&ctx.job.id, kind, &partition.key)?;
    let Some(block) = metadata_block(&units) else {
        return Ok(());
    };

    tracing::info!(anchor, "Re-rendering anchor step with aggregated metadata");
    let key = UnitKey::new(kind, partition.key.clone(), Some(anchor.to_string()));
    process_unit(ctx, key, &partition.label, Some(block), true).await?;
    Ok(())
}

/// Claims, renders and publishes one unit with escalating per-attempt
/// timeouts, recording every transition in the ledger.
pub(crate) async fn process_unit(
    ctx: &RunContext,
    key: UnitKey,
    label: &str,
    attachment: Option<String>,
    force: bool,
) -> Result<UnitRun, UnitError> {
    ctx.heartbeat();

    let mut unit = match ctx.deps.ledger.claim(&ctx.job.id, &key, force)? {
        Claim::Completed(unit) => {
            tracing::debug!(unit = %key, status = %unit.status, "Already done; skipping");
            return Ok(UnitRun::Reused(unit.status));
        }
        Claim::Claimed { unit, .. } => unit,
    };
    ctx.deps.notifier.notify(JobEvent::unit(&unit));

    let runner = &ctx.deps.config.runner;
    let attempts = runner.unit_attempts.max(1);
    let mut attempt = 1;
    let error = loop {
        match attempt_once(ctx, &key, label, attempt, attachment.clone()).await {
            Ok((file_name, outcome, fills)) => {
                unit.file_name = Some(file_name);
                if !fills.is_empty() {
                    unit.fills = fills;
                }
                unit.status = outcome.into();
                ctx.record(&unit)?;
                ctx.heartbeat();
                tracing::info!(unit = %key, status = %unit.status, attempt, "Unit done");
                return Ok(UnitRun::Processed(unit.status));
            }
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(unit = %key, attempt, error = %e, "Attempt failed; retrying");
                unit.status = UnitStatus::Retrying;
                ctx.record(&unit)?;
                ctx.heartbeat();
                attempt += 1;
            }
            Err(e) => break e,
        }
    };

    tracing::warn!(unit = %key, attempt, error = %error, "Unit failed");
    unit.status = UnitStatus::Failed;
    ctx.record(&unit)?;
    ctx.heartbeat();
    Err(error)
}

async fn attempt_once(
    ctx: &RunContext,
    key: &UnitKey,
    label: &str,
    attempt: u32,
    attachment: Option<String>,
) -> Result<(String, PublishOutcome, Vec<LeafFill>), UnitError> {
    let runner = &ctx.deps.config.runner;
    let timeout = runner.unit_timeout(attempt);
    let request = UnitRequest {
        key: key.clone(),
        label: label.to_string(),
        attempt,
        timeout,
        attachment,
    };

    let artifact = tokio::time::timeout(
        timeout,
        ctx.deps.processor.process(&ctx.job, &request, &ctx.context),
    )
    .await
    .map_err(|_| UnitError::Timeout(timeout))??;

    let (name_template, description_template, policy) = ctx.templates(key.kind);
    let vars = ctx.vars(key, label);
    let file_name = TemplateEngine::substitute_name(name_template, &vars);
    let description = TemplateEngine::substitute(description_template, &vars);

    let token = ctx.token.current();
    let outcome = ctx
        .deps
        .publisher
        .publish(
            &token,
            &PublishRequest {
                name: &file_name,
                bytes: &artifact.bytes,
                description: &description,
                policy,
                comment: &runner.upload_comment,
            },
        )
        .await?;

    let throttle = runner.upload_throttle();
    if !throttle.is_zero() && outcome != PublishOutcome::Skipped {
        tokio::time::sleep(throttle).await;
    }

    Ok((file_name, outcome, artifact.fills))
}
