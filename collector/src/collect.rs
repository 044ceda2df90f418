//! One collection run: directory lookup, task resolution, fan-out, report.
use crate::config::CollectionConfig;
use crate::executor::Executor;
use crate::metric::{InvalidMetrics, parse_metrics};
use crate::metrics_defs::COLLECT_DURATION;
use crate::params::Params;
use crate::report::CollectionReport;
use crate::task::{CollectionRequest, DEFAULT_LIMIT, ResolveError, resolve_tasks};
use crate::upstream::UsageClient;
use crate::window::{WindowError, resolve_window};
use chrono::{DateTime, TimeZone, Utc};
use directory::errors::StoreError;
use directory::store::{TenantDirectory, UsageStore};
use shared::histogram;
use std::sync::Arc;
use std::time::Instant;

pub const TENANT_KEYS: &[&str] = &["tenant", "tenants"];
pub const PROJECT_KEYS: &[&str] = &["projectID", "projectIDs", "projectIds"];
pub const METRIC_KEYS: &[&str] = &["metric", "metrics"];

/// Request parameters that fail before any task runs.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParamError {
    #[error(transparent)]
    Metrics(#[from] InvalidMetrics),

    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Failed to load tenant directory: {0}")]
    Directory(#[from] StoreError),

    #[error("Usage collection did not complete: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Builds a collection request from raw parameters. `now` fixes the default
/// window for the whole run.
pub fn parse_collection_request<Tz: TimeZone>(
    params: &Params,
    config: &CollectionConfig,
    now: &DateTime<Tz>,
) -> Result<CollectionRequest, ParamError> {
    let metrics = match parse_metrics(&params.list(METRIC_KEYS))? {
        metrics if metrics.is_empty() => config.default_metrics(),
        metrics => metrics,
    };

    let window = resolve_window(
        params.str("startTime").as_deref(),
        params.str("endTime").as_deref(),
        now,
    )?;

    Ok(CollectionRequest {
        tenants: params.list(TENANT_KEYS),
        projects: params.list(PROJECT_KEYS),
        metrics,
        window,
        limit: params.positive_int("limit").unwrap_or(DEFAULT_LIMIT),
        cursor: params.cursor(),
        environment_id: params.str("environmentID"),
    })
}

pub struct UsageCollector {
    directory: Arc<dyn TenantDirectory>,
    executor: Executor,
    timezone: Option<String>,
}

impl UsageCollector {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        client: Arc<dyn UsageClient>,
        usage_store: Arc<dyn UsageStore>,
        config: &CollectionConfig,
    ) -> Self {
        UsageCollector {
            directory,
            executor: Executor::new(client, usage_store, config.max_concurrent_tasks),
            timezone: config.timezone.clone(),
        }
    }

    pub async fn collect(&self, request: CollectionRequest) -> Result<CollectionReport, CollectError> {
        let started = Instant::now();
        let ran_at = Utc::now();

        let entries = self.directory.list_active_projects().await?;
        let tasks = resolve_tasks(entries, &request)?;
        tracing::info!(
            tasks = tasks.len(),
            metrics = request.metrics.len(),
            window_start = %request.window.start_time(),
            window_end = %request.window.end_time(),
            "Starting usage collection"
        );

        // Detached so every task still settles if the caller goes away
        let executor = self.executor.clone();
        let results = tokio::spawn(async move { executor.run(tasks).await }).await?;

        let report = CollectionReport {
            ran_at,
            window: request.window,
            timezone: self.timezone.clone(),
            limit: request.limit,
            metrics: request.metrics,
            results,
        };

        histogram!(COLLECT_DURATION).record(started.elapsed().as_secs_f64());
        tracing::info!(
            tenants = report.tenant_count(),
            projects = report.project_count(),
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "Usage collection finished"
        );

        Ok(report)
    }
}
