use crate::errors::GatewayError;
use crate::events::{EventRejection, extract_events, validate_events};
use crate::handler::{Handler, HandlerResponse};
use crate::metrics_defs::{EVENTS_ACCEPTED, EVENTS_REJECTED};
use crate::params::Params;
use async_trait::async_trait;
use chrono::Utc;
use directory::store::{EventStore, TenantDirectory};
use directory::types::Tenant;
use hyper::body::Bytes;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, AUTHORIZATION, HeaderValue, ORIGIN, VARY,
};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use shared::counter;
use shared::http::{full_body, make_json_error, make_json_response};
use std::sync::Arc;

const EVENT_TOKEN_HEADER: &str = "x-event-token";
const BEARER_PREFIX: &str = "bearer ";
const PREFLIGHT_ALLOW_HEADERS: &str = "authorization, content-type, x-event-token";
const PREFLIGHT_MAX_AGE_SECS: &str = "600";

/// Accepts batches of client events authenticated by a tenant write token.
pub struct IngestEventsHandler {
    directory: Arc<dyn TenantDirectory>,
    events: Arc<dyn EventStore>,
}

impl IngestEventsHandler {
    pub fn new(directory: Arc<dyn TenantDirectory>, events: Arc<dyn EventStore>) -> Self {
        Self { directory, events }
    }
}

#[derive(Serialize)]
struct TenantSummary<'a> {
    id: &'a str,
    slug: &'a str,
}

#[derive(Serialize)]
struct IngestResponse<'a> {
    tenant: TenantSummary<'a>,
    accepted: usize,
    rejected: usize,
    errors: &'a [EventRejection],
}

/// `Authorization: Bearer`, then `x-event-token`, then the `token` query
/// parameter. A bearer header is final even when its token is blank.
fn extract_token(request: &Request<Bytes>) -> Option<String> {
    if let Some(auth) = header_str(request, AUTHORIZATION.as_str())
        && auth
            .get(..BEARER_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BEARER_PREFIX))
    {
        return Some(auth[BEARER_PREFIX.len()..].trim().to_string()).filter(|t| !t.is_empty());
    }

    if let Some(token) = header_str(request, EVENT_TOKEN_HEADER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    Params::from_query(request.uri().query()).str("token")
}

fn header_str<'a>(request: &'a Request<Bytes>, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|value| value.to_str().ok())
}

fn allow_origin(response: &mut HandlerResponse, origin: HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(VARY, HeaderValue::from_static("Origin"));
}

impl IngestEventsHandler {
    /// `Some(response)` when the tenant restricts origins and `origin` is not
    /// among them, or the allow-list cannot be loaded.
    async fn reject_origin(&self, tenant: &Tenant, origin: &HeaderValue) -> Option<HandlerResponse> {
        let allowed = match self.directory.allowed_origins(&tenant.id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(tenant = %tenant.slug, error = %e, "Failed to load allowed origins");
                return Some(make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()));
            }
        };
        let permitted = allowed.is_empty()
            || origin
                .to_str()
                .is_ok_and(|origin| allowed.iter().any(|a| a == origin));
        if permitted {
            return None;
        }

        tracing::debug!(tenant = %tenant.slug, origin = ?origin, "Rejected event origin");
        Some(make_json_error(
            StatusCode::FORBIDDEN,
            "Origin is not allowed for this tenant.",
        ))
    }

    /// Answers a CORS preflight. Browsers send no credentials here, so the
    /// tenant allow-list is only checked when the URL carries a `token`;
    /// otherwise it is enforced on the POST itself.
    async fn preflight(&self, request: &Request<Bytes>) -> HandlerResponse {
        let mut response = Response::new(full_body(Bytes::new()));
        *response.status_mut() = StatusCode::NO_CONTENT;

        let Some(origin) = request.headers().get(ORIGIN).cloned() else {
            return response;
        };

        if let Some(token) = Params::from_query(request.uri().query()).str("token")
            && let Ok(Some(found)) = self.directory.tenant_for_write_token(&token).await
            && let Some(rejected) = self.reject_origin(&found.tenant, &origin).await
        {
            return rejected;
        }

        allow_origin(&mut response, origin);
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
        );
        response
    }
}

#[async_trait]
impl Handler for IngestEventsHandler {
    fn name(&self) -> &'static str {
        "ingest_events"
    }

    fn allowed_methods(&self) -> &'static [Method] {
        &[Method::POST, Method::OPTIONS]
    }

    async fn handle(&self, request: Request<Bytes>) -> HandlerResponse {
        if request.method() == Method::OPTIONS {
            return self.preflight(&request).await;
        }

        let Some(token) = extract_token(&request) else {
            return make_json_error(
                StatusCode::UNAUTHORIZED,
                "Missing event write token (Authorization or x-event-token).",
            );
        };

        let tenant = match self.directory.tenant_for_write_token(&token).await {
            Ok(Some(found)) => found.tenant,
            Ok(None) => {
                return make_json_error(
                    StatusCode::FORBIDDEN,
                    "Invalid or inactive event write token.",
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to validate event token");
                return make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
            }
        };

        let origin = request.headers().get(ORIGIN).cloned();
        if let Some(origin) = &origin
            && let Some(rejected) = self.reject_origin(&tenant, origin).await
        {
            return rejected;
        }

        let events = serde_json::from_slice(request.body())
            .ok()
            .and_then(extract_events)
            .filter(|events| !events.is_empty());
        let Some(events) = events else {
            return make_json_error(
                StatusCode::BAD_REQUEST,
                "Body must include an \"events\" array with at least one event.",
            );
        };

        let batch = validate_events(&tenant.id, &events, Utc::now());

        if !batch.rows.is_empty() {
            match self.events.insert_events(&batch.rows).await {
                Ok(inserted) => tracing::debug!(
                    tenant = %tenant.slug,
                    accepted = batch.rows.len(),
                    inserted,
                    "Stored events"
                ),
                Err(e) => {
                    tracing::error!(tenant = %tenant.slug, error = %e, "Failed to store events");
                    return make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
                }
            }
        }

        counter!(EVENTS_ACCEPTED).increment(batch.rows.len() as u64);
        counter!(EVENTS_REJECTED).increment(batch.errors.len() as u64);

        let status = if batch.errors.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::MULTI_STATUS
        };
        let mut response = make_json_response::<_, GatewayError>(
            status,
            &IngestResponse {
                tenant: TenantSummary {
                    id: &tenant.id,
                    slug: &tenant.slug,
                },
                accepted: batch.rows.len(),
                rejected: batch.errors.len(),
                errors: &batch.errors,
            },
        );

        if let Some(origin) = origin {
            allow_origin(&mut response, origin);
        }
        response
    }
}
