//! Turning directory entries and request filters into an ordered task list.
use crate::metric::Metric;
use crate::upstream::{ApiKey, Cursor, UsageQuery};
use crate::window::Window;
use directory::crypto::decrypt_secret;
use directory::types::{Tenant, TenantProject};

pub const DEFAULT_LIMIT: u32 = 100;

/// One (tenant, project, metric, window) query.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub tenant: Tenant,
    pub project_id: String,
    pub metric: Metric,
    pub window: Window,
    pub limit: u32,
    pub cursor: Option<Cursor>,
    pub environment_id: Option<String>,
}

impl Task {
    pub fn query(&self) -> UsageQuery {
        UsageQuery {
            project_id: self.project_id.clone(),
            metric: self.metric,
            window: self.window,
            limit: self.limit,
            cursor: self.cursor.clone(),
            environment_id: self.environment_id.clone(),
        }
    }
}

/// A task paired with the credential it runs under.
#[derive(Clone, Debug)]
pub struct QueryTask {
    pub task: Task,
    pub api_key: ApiKey,
}

/// A validated collection request. Metrics are already resolved to a
/// non-empty set and the window is fixed for the whole run.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionRequest {
    /// Tenant slugs to keep. Empty keeps all.
    pub tenants: Vec<String>,
    /// Vendor project ids to keep. Empty keeps all.
    pub projects: Vec<String>,
    pub metrics: Vec<Metric>,
    pub window: Window,
    pub limit: u32,
    pub cursor: Option<Cursor>,
    pub environment_id: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No active tenants with credentials and projects are configured.")]
    EmptyDirectory,

    #[error("No matching tenant projects found for the provided filters.")]
    NoMatchingProjects,
}

/// Request override first, then the credential's stored default.
pub fn resolve_environment(explicit: Option<&str>, stored: Option<&str>) -> Option<String> {
    fn present(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|env| !env.is_empty())
    }
    present(explicit).or_else(|| present(stored)).map(String::from)
}

/// Builds the task list: directory entries in order, metrics inner.
pub fn resolve_tasks(
    entries: Vec<TenantProject>,
    request: &CollectionRequest,
) -> Result<Vec<QueryTask>, ResolveError> {
    if entries.is_empty() {
        return Err(ResolveError::EmptyDirectory);
    }

    let matching: Vec<TenantProject> = entries
        .into_iter()
        .filter(|entry| request.tenants.is_empty() || request.tenants.contains(&entry.tenant.slug))
        .filter(|entry| {
            request.projects.is_empty() || request.projects.contains(&entry.project.project_id)
        })
        .collect();

    if matching.is_empty() {
        return Err(ResolveError::NoMatchingProjects);
    }

    let mut tasks = Vec::with_capacity(matching.len() * request.metrics.len());
    for entry in matching {
        let api_key = ApiKey::new(decrypt_secret(&entry.credential.api_key_encrypted));
        let environment_id = resolve_environment(
            request.environment_id.as_deref(),
            entry.credential.environment_id.as_deref(),
        );

        for metric in &request.metrics {
            tasks.push(QueryTask {
                task: Task {
                    tenant: entry.tenant.clone(),
                    project_id: entry.project.project_id.clone(),
                    metric: *metric,
                    window: request.window,
                    limit: request.limit,
                    cursor: request.cursor.clone(),
                    environment_id: environment_id.clone(),
                },
                api_key: api_key.clone(),
            });
        }
    }

    Ok(tasks)
}
