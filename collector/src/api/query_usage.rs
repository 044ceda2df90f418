use crate::errors::GatewayError;
use crate::handler::{Handler, HandlerResponse, request_params};
use crate::metric::{Metric, UnknownMetric};
use crate::params::Params;
use crate::task::{DEFAULT_LIMIT, resolve_environment};
use crate::upstream::{ApiKey, UpstreamError, UsageClient, UsageQuery};
use crate::window::{Window, WindowError, format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use directory::crypto::decrypt_secret;
use directory::store::TenantDirectory;
use directory::types::TenantConfig;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use serde_json::{Value as JsonValue, json};
use shared::http::{make_json_error, make_json_response};
use std::sync::Arc;

const DEFAULT_METRIC: Metric = Metric::Interactions;

/// Queries one metric for one project of one tenant, without persisting.
pub struct QueryUsageHandler {
    directory: Arc<dyn TenantDirectory>,
    client: Arc<dyn UsageClient>,
    default_tenant: Option<String>,
}

impl QueryUsageHandler {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        client: Arc<dyn UsageClient>,
        default_tenant: Option<String>,
    ) -> Self {
        Self {
            directory,
            client,
            default_tenant,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
enum QueryParamError {
    #[error("Missing projectID parameter and tenant default project fallback.")]
    MissingProject,

    #[error(transparent)]
    Metric(#[from] UnknownMetric),

    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Missing or empty means the default metric. Anything else must name one.
fn parse_metric(value: Option<&JsonValue>) -> Result<Metric, UnknownMetric> {
    match value {
        None | Some(JsonValue::Null) => Ok(DEFAULT_METRIC),
        Some(JsonValue::String(s)) if s.is_empty() => Ok(DEFAULT_METRIC),
        Some(JsonValue::String(s)) => s.parse(),
        Some(_) => Err(UnknownMetric),
    }
}

/// Explicit bounds, else the 24 hours up to `now`.
fn parse_window(params: &Params, now: DateTime<Utc>) -> Result<Window, WindowError> {
    let start = match params.str("startTime") {
        Some(raw) => parse_timestamp(&raw).ok_or(WindowError::InvalidStart(raw))?,
        None => now - Duration::hours(24),
    };
    let end = match params.str("endTime") {
        Some(raw) => parse_timestamp(&raw).ok_or(WindowError::InvalidEnd(raw))?,
        None => now,
    };
    Window::new(start, end)
}

fn build_query(
    params: &Params,
    config: &TenantConfig,
    now: DateTime<Utc>,
) -> Result<UsageQuery, QueryParamError> {
    let project_id = params
        .str("projectID")
        .or_else(|| config.projects.first().map(|p| p.project_id.clone()))
        .ok_or(QueryParamError::MissingProject)?;

    Ok(UsageQuery {
        project_id,
        metric: parse_metric(params.raw("metric"))?,
        window: parse_window(params, now)?,
        limit: params.positive_int("limit").unwrap_or(DEFAULT_LIMIT),
        cursor: params.cursor(),
        environment_id: resolve_environment(
            params.str("environmentID").as_deref(),
            config.credential.environment_id.as_deref(),
        ),
    })
}

fn query_parameters(tenant: &str, query: &UsageQuery) -> JsonValue {
    let mut parameters = json!({
        "tenant": tenant,
        "projectID": query.project_id,
        "startTime": query.window.start_time(),
        "endTime": query.window.end_time(),
        "limit": query.limit,
        "metric": query.metric,
    });
    if let Some(environment_id) = &query.environment_id {
        parameters["environmentID"] = json!(environment_id);
    }
    if let Some(cursor) = query.cursor.as_ref().filter(|c| c.is_set()) {
        parameters["cursor"] = json!(cursor);
    }
    parameters
}

fn upstream_error_response(error: UpstreamError) -> HandlerResponse {
    match error {
        UpstreamError::Upstream { status, detail } => {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            make_json_response(
                code,
                &json!({
                    "error": "Analytics API request failed",
                    "detail": detail,
                    "status": status,
                }),
            )
        }
        UpstreamError::Transport(detail) | UpstreamError::Decode(detail) => make_json_response(
            StatusCode::BAD_GATEWAY,
            &json!({
                "error": "Failed to reach analytics API",
                "detail": detail,
            }),
        ),
    }
}

#[async_trait]
impl Handler for QueryUsageHandler {
    fn name(&self) -> &'static str {
        "query_usage"
    }

    fn allowed_methods(&self) -> &'static [Method] {
        &[Method::GET, Method::POST]
    }

    async fn handle(&self, request: Request<Bytes>) -> HandlerResponse {
        let params = request_params(&request);

        let Some(slug) = params.str("tenant").or_else(|| self.default_tenant.clone()) else {
            return make_json_error(
                StatusCode::BAD_REQUEST,
                "Missing tenant parameter or default tenant fallback.",
            );
        };

        let config = match self.directory.fetch_tenant_config(&slug).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return make_json_error(
                    StatusCode::NOT_FOUND,
                    &format!(
                        "Tenant not found or missing active credentials/projects for slug: {slug}"
                    ),
                );
            }
            Err(e) => {
                tracing::error!(tenant = %slug, error = %e, "Failed to load tenant config");
                return make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
            }
        };

        let now = Utc::now();
        let query = match build_query(&params, &config, now) {
            Ok(query) => query,
            Err(e) => return make_json_error(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        let api_key = ApiKey::new(decrypt_secret(&config.credential.api_key_encrypted));
        match self.client.query(&query, &api_key).await {
            Ok(result) => make_json_response::<_, GatewayError>(
                StatusCode::OK,
                &json!({
                    "queriedAt": format_timestamp(&Utc::now()),
                    "parameters": query_parameters(&slug, &query),
                    "result": result,
                }),
            ),
            Err(e) => {
                tracing::warn!(
                    tenant = %slug,
                    project_id = %query.project_id,
                    metric = %query.metric,
                    error = %e,
                    "Usage query failed"
                );
                upstream_error_response(e)
            }
        }
    }
}
