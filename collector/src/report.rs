use crate::executor::TaskResult;
use crate::metric::Metric;
use crate::outcome::Outcome;
use crate::window::{Window, format_timestamp};
use chrono::{DateTime, Utc};
use directory::types::Tenant;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Consolidated result of one collection run.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionReport {
    pub ran_at: DateTime<Utc>,
    pub window: Window,
    pub timezone: Option<String>,
    pub limit: u32,
    pub metrics: Vec<Metric>,
    /// One entry per task, in task order.
    pub results: Vec<TaskResult>,
}

impl CollectionReport {
    /// Distinct tenants among the tasks.
    pub fn tenant_count(&self) -> usize {
        self.results
            .iter()
            .map(|r| r.outcome.task().tenant.id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct (tenant, project) pairs among the tasks.
    pub fn project_count(&self) -> usize {
        self.results
            .iter()
            .map(|r| {
                let task = r.outcome.task();
                (task.tenant.id.as_str(), task.project_id.as_str())
            })
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody<'a> {
    ran_at: String,
    tenant_count: usize,
    project_count: usize,
    succeeded_count: usize,
    failed_count: usize,
    window: &'a Window,
    timezone: &'a Option<String>,
    limit: u32,
    metrics: &'a [Metric],
    results: &'a [TaskResult],
}

impl Serialize for CollectionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportBody {
            ran_at: format_timestamp(&self.ran_at),
            tenant_count: self.tenant_count(),
            project_count: self.project_count(),
            succeeded_count: self.succeeded_count(),
            failed_count: self.failed_count(),
            window: &self.window,
            timezone: &self.timezone,
            limit: self.limit,
            metrics: &self.metrics,
            results: &self.results,
        }
        .serialize(serializer)
    }
}

#[derive(Serialize)]
struct TenantRef<'a> {
    id: &'a str,
    slug: &'a str,
    name: &'a str,
}

impl<'a> From<&'a Tenant> for TenantRef<'a> {
    fn from(tenant: &'a Tenant) -> Self {
        TenantRef {
            id: &tenant.id,
            slug: &tenant.slug,
            name: &tenant.name,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultEntry<'a> {
    status: &'static str,
    tenant: TenantRef<'a>,
    #[serde(rename = "projectID")]
    project_id: &'a str,
    metric: Metric,
    #[serde(rename = "environmentID", skip_serializing_if = "Option::is_none")]
    environment_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonValue>,
    persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistence_error: Option<&'a str>,
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let task = self.outcome.task();
        let (result, error) = match &self.outcome {
            Outcome::Success { payload, .. } => (Some(payload), None),
            Outcome::Failure { failure, .. } => (None, Some(failure.to_json())),
        };

        ResultEntry {
            status: self.outcome.status(),
            tenant: (&task.tenant).into(),
            project_id: &task.project_id,
            metric: task.metric,
            environment_id: task.environment_id.as_deref(),
            result,
            error,
            persisted: self.persist_error.is_none(),
            persistence_error: self.persist_error.as_deref(),
        }
        .serialize(serializer)
    }
}
