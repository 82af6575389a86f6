//! Drives one job from Queued to Done or Failed.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::cancel::CancelSignal;
use super::executor::{FanOutExecutor, FanOutReport};
use super::gallery::gallery_page;
use super::unit::{primary_kind, process_partition, RunContext};
use super::EngineDeps;
use crate::broadcast::JobEvent;
use crate::collab::{CollaboratorError, Partition, Principal, TokenCell};
use crate::config::variables::{chart_parameter_vars, TemplateEngine, TemplateVars};
use crate::db::DatabaseError;
use crate::error::ValidationError;
use crate::model::{JobKind, JobStatus, UnitKind};
use crate::publish::PublishError;

/// Why a run ended the job early (or could not start it).
#[derive(Error, Debug)]
pub enum RunError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{id}' is {status}, not queued")]
    NotRunnable { id: String, status: JobStatus },

    #[error("invalid parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not acquire upload token: {0}")]
    Token(#[source] CollaboratorError),

    #[error("could not resolve partitions: {0}")]
    Resolve(#[source] CollaboratorError),

    #[error("post-processing failed: {0}")]
    PostProcess(#[from] PublishError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub struct JobRunner {
    deps: EngineDeps,
}

impl JobRunner {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Runs a Queued job on behalf of `principal` and returns its final status.
    pub async fn run(&self, job_id: &str, principal: Principal) -> Result<JobStatus, RunError> {
        let span = tracing::info_span!("job", job_id = %job_id, user = %principal.username);
        self.run_inner(job_id, principal).instrument(span).await
    }

    async fn run_inner(&self, job_id: &str, principal: Principal) -> Result<JobStatus, RunError> {
        let deps = &self.deps;
        let mut job = deps
            .jobs
            .get(job_id)?
            .ok_or_else(|| RunError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Queued {
            return Err(RunError::NotRunnable {
                id: job.id,
                status: job.status,
            });
        }

        let chart_name = match job.params.validate(&deps.config.source.base_url) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting job with invalid parameters");
                self.fail(&job.id, JobStatus::Queued, &e.to_string())?;
                return Err(e.into());
            }
        };
        job.chart_name = Some(chart_name);
        deps.jobs.record_details(&job)?;

        let token = match deps.tokens.acquire_token(&principal).await {
            Ok(token) => TokenCell::new(token),
            Err(e) => {
                self.fail(&job.id, JobStatus::Queued, &format!("token: {}", e))?;
                return Err(RunError::Token(e));
            }
        };

        if !deps
            .jobs
            .transition(&job.id, &[JobStatus::Queued], JobStatus::Processing, None)?
        {
            let status = deps.jobs.get(&job.id)?.map_or(JobStatus::Failed, |j| j.status);
            return Err(RunError::NotRunnable { id: job.id, status });
        }
        job.status = JobStatus::Processing;
        deps.jobs.touch_heartbeat(&job.id)?;
        self.notify_job(&job.id);
        tracing::info!(chart = ?job.chart_name, kind = %job.params.kind, "Job started");

        let cancel = CancelSignal::new(job.id.clone(), deps.jobs.clone());
        let done = CancellationToken::new();
        let _stop_loops = done.clone().drop_guard();
        self.spawn_heartbeat_loop(cancel.clone(), done.clone());
        self.spawn_token_loop(principal, token.clone(), done.clone());

        let resolution = match deps.resolver.resolve_partitions(&job).await {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!(error = %e, "Could not resolve partitions");
                self.fail(&job.id, JobStatus::Processing, &format!("resolve: {}", e))?;
                return Err(RunError::Resolve(e));
            }
        };
        tracing::info!(
            primary = resolution.primary.len(),
            secondary = resolution.secondary.len(),
            title = %resolution.context.title,
            "Resolved partitions"
        );

        let kind = job.params.kind;
        let generate_template = job.params.generate_template;
        let imports_countries = job.params.imports_countries();
        let ctx = Arc::new(RunContext {
            deps: deps.clone(),
            job,
            context: resolution.context,
            token,
            cancel: cancel.clone(),
        });

        let report = self
            .fan_out(&ctx, resolution.primary, primary_kind(kind))
            .await;
        log_report("primary", &report);

        if imports_countries && !resolution.secondary.is_empty() && !cancel.refresh() {
            let report = self
                .fan_out(&ctx, resolution.secondary, UnitKind::Country)
                .await;
            log_report("countries", &report);
        }

        if generate_template && kind == JobKind::Map && !cancel.refresh() {
            if let Err(e) = self.publish_gallery(&ctx).await {
                tracing::error!(error = %e, "Gallery template page failed");
                self.fail(&ctx.job.id, JobStatus::Processing, &e.to_string())?;
                return Err(e);
            }
        }

        let finished = deps.jobs.transition(
            &ctx.job.id,
            &[JobStatus::Processing],
            JobStatus::Done,
            None,
        )?;
        let status = if finished {
            JobStatus::Done
        } else {
            deps.jobs
                .get(&ctx.job.id)?
                .map_or(JobStatus::Failed, |j| j.status)
        };
        self.notify_job(&ctx.job.id);
        tracing::info!(status = %status, "Job finished");
        Ok(status)
    }

    async fn fan_out(
        &self,
        ctx: &Arc<RunContext>,
        partitions: Vec<Partition>,
        kind: UnitKind,
    ) -> FanOutReport {
        FanOutExecutor::new(self.deps.config.runner.fan_out)
            .run(partitions, &ctx.cancel, |partition| {
                process_partition(Arc::clone(ctx), partition, kind)
            })
            .await
    }

    async fn publish_gallery(&self, ctx: &RunContext) -> Result<(), RunError> {
        let units = self.deps.ledger.list_by_job(&ctx.job.id)?;
        let Some(page) = gallery_page(&units) else {
            tracing::info!("No published maps; skipping gallery template page");
            return Ok(());
        };

        let vars = TemplateVars {
            url: ctx.job.params.url.clone(),
            name: ctx.job.chart_name.clone().unwrap_or_default(),
            title: ctx.context.title.clone(),
            start_year: ctx.context.start_year.clone(),
            end_year: ctx.context.end_year.clone(),
            params: chart_parameter_vars(ctx.job.params.chart_parameters.as_deref()),
            ..Default::default()
        };
        let title = TemplateEngine::substitute_name(&self.deps.config.source.template_title, &vars);

        let token = ctx.token.current();
        let saved = self
            .deps
            .publisher
            .publish_page(&token, &title, &page, &self.deps.config.runner.upload_comment)
            .await?;

        let mut job = ctx.job.clone();
        job.template_name = Some(saved);
        self.deps.jobs.record_details(&job)?;
        self.notify_job(&job.id);
        tracing::info!(title = ?job.template_name, "Gallery template page published");
        Ok(())
    }

    fn spawn_heartbeat_loop(&self, cancel: CancelSignal, done: CancellationToken) {
        let period = self.deps.config.runner.heartbeat_reload();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = done.cancelled() => break,
                        _ = ticker.tick() => {
                            if cancel.refresh() {
                                tracing::info!("Job left Processing; no new units will start");
                                break;
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn spawn_token_loop(&self, principal: Principal, token: TokenCell, done: CancellationToken) {
        let period = self.deps.config.runner.token_refresh();
        let tokens = Arc::clone(&self.deps.tokens);
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = done.cancelled() => break,
                        _ = ticker.tick() => match tokens.acquire_token(&principal).await {
                            Ok(fresh) => {
                                token.replace(fresh);
                                tracing::debug!("Upload token refreshed");
                            }
                            Err(e) => tracing::warn!(error = %e, "Token refresh failed"),
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }

    /// Fails the job if it is still in `from`, recording why.
    fn fail(&self, job_id: &str, from: JobStatus, reason: &str) -> Result<(), DatabaseError> {
        if self
            .deps
            .jobs
            .transition(job_id, &[from], JobStatus::Failed, Some(reason))?
        {
            self.notify_job(job_id);
        }
        Ok(())
    }

    fn notify_job(&self, job_id: &str) {
        match self.deps.jobs.get(job_id) {
            Ok(Some(job)) => self.deps.notifier.notify(JobEvent::job(&job)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Could not load job for notification"),
        }
    }
}

fn log_report(phase: &str, report: &FanOutReport) {
    if report.failures.is_empty() {
        tracing::info!(phase, launched = report.launched, "Phase complete");
    } else {
        let failed: Vec<&str> = report
            .failures
            .iter()
            .map(|f| f.partition.as_str())
            .collect();
        tracing::warn!(
            phase,
            launched = report.launched,
            not_launched = report.not_launched,
            failed = ?failed,
            "Phase complete with failed partitions"
        );
    }
}
