use crate::metric::Metric;
use crate::task::{DEFAULT_LIMIT, QueryTask, Task};
use crate::upstream::{ApiKey, UpstreamError, UsageClient, UsageQuery};
use crate::window::Window;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory::config::TenantSeed;
use directory::errors::{StoreError, StoreResult};
use directory::memory::MemoryStore;
use directory::store::UsageStore;
use directory::types::{Credential, Project, PullRecord, Tenant, TenantProject, UsageRow};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{Value as JsonValue, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

pub fn test_window() -> Window {
    let start = DateTime::parse_from_rfc3339("2025-03-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339("2025-03-02T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    Window::new(start, end).unwrap()
}

fn capitalize(slug: &str) -> String {
    let mut chars = slug.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn test_tenant(slug: &str) -> Tenant {
    Tenant::new(format!("{slug}-id"), slug, capitalize(slug))
}

/// A directory entry whose key decrypts to `{slug}-key`.
pub fn test_entry(slug: &str, project: &str) -> TenantProject {
    let tenant = test_tenant(slug);
    TenantProject {
        credential: Credential {
            id: format!("{slug}-cred"),
            tenant_id: tenant.id.clone(),
            api_key_encrypted: format!("encrypted:{slug}-key"),
            environment_id: None,
            active: true,
            rotated_at: None,
        },
        project: Project {
            id: format!("{slug}-{project}"),
            tenant_id: tenant.id.clone(),
            project_id: project.to_string(),
            display_name: None,
            active: true,
        },
        tenant,
    }
}

pub fn test_task(slug: &str, project: &str) -> Task {
    Task {
        tenant: test_tenant(slug),
        project_id: project.to_string(),
        metric: Metric::Interactions,
        window: test_window(),
        limit: DEFAULT_LIMIT,
        cursor: None,
        environment_id: None,
    }
}

pub fn test_query_task(slug: &str, project: &str, metric: Metric) -> QueryTask {
    QueryTask {
        task: Task {
            metric,
            ..test_task(slug, project)
        },
        api_key: ApiKey::new(format!("{slug}-key")),
    }
}

/// Two tenants: `acme` with projects p1 and p2, `zeta` with z1 and an origin
/// allow-list.
pub fn seeded_store() -> MemoryStore {
    MemoryStore::from_seeds(&[
        TenantSeed {
            slug: "acme".into(),
            name: Some("Acme".into()),
            api_key: "encrypted:acme-key".into(),
            environment_id: None,
            projects: vec!["p1".into(), "p2".into()],
            write_tokens: vec!["acme-token".into()],
            allowed_origins: vec![],
        },
        TenantSeed {
            slug: "zeta".into(),
            name: Some("Zeta".into()),
            api_key: "zeta-key".into(),
            environment_id: Some("production".into()),
            projects: vec!["z1".into()],
            write_tokens: vec!["zeta-token".into()],
            allowed_origins: vec!["https://zeta.example".into()],
        },
    ])
}

type Respond = dyn Fn(&UsageQuery) -> Result<JsonValue, UpstreamError> + Send + Sync;
type Delay = dyn Fn(&UsageQuery) -> Duration + Send + Sync;

/// Scripted usage client that also tracks call concurrency.
pub struct StubClient {
    respond: Box<Respond>,
    delay: Option<Box<Delay>>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub queries: parking_lot::Mutex<Vec<(UsageQuery, String)>>,
}

impl StubClient {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&UsageQuery) -> Result<JsonValue, UpstreamError> + Send + Sync + 'static,
    {
        StubClient {
            respond: Box::new(respond),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Answers every query with a one-item payload.
    pub fn ok() -> Self {
        Self::new(|query| {
            Ok(json!({
                "result": {
                    "items": [{"period": "2025-03-01T00:00:00Z", "count": 1, "project": query.project_id}],
                }
            }))
        })
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&UsageQuery) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn recorded(&self) -> Vec<(UsageQuery, String)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl UsageClient for StubClient {
    async fn query(&self, query: &UsageQuery, api_key: &ApiKey) -> Result<JsonValue, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .push((query.clone(), api_key.expose().to_string()));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(query)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(query)
    }
}

/// Usage store that rejects every write.
pub struct FailingUsageStore;

#[async_trait]
impl UsageStore for FailingUsageStore {
    async fn upsert_usage(&self, _rows: &[UsageRow]) -> StoreResult<u64> {
        Err(StoreError::InvalidValue {
            column: "usage",
            reason: "store offline".into(),
        })
    }

    async fn append_pull(&self, _record: &PullRecord) -> StoreResult<()> {
        Err(StoreError::InvalidValue {
            column: "pulls",
            reason: "store offline".into(),
        })
    }
}

/// Accepts usage rows but panics on every pull log append.
#[derive(Default)]
pub struct PanickingUsageStore {
    pub pull_attempts: AtomicUsize,
}

#[async_trait]
impl UsageStore for PanickingUsageStore {
    async fn upsert_usage(&self, rows: &[UsageRow]) -> StoreResult<u64> {
        Ok(rows.len() as u64)
    }

    async fn append_pull(&self, _record: &PullRecord) -> StoreResult<()> {
        self.pull_attempts.fetch_add(1, Ordering::SeqCst);
        panic!("pull log unavailable");
    }
}

/// What the mock analytics API saw.
pub struct MockRequest {
    pub api_key: Option<String>,
    pub body: JsonValue,
}

pub struct MockServer {
    pub port: u16,
    requests: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Start a mock HTTP server that answers every request with `response_fn`.
pub async fn start_mock_server<F>(response_fn: F) -> MockServer
where
    F: Fn(MockRequest) -> (StatusCode, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let response_fn = Arc::new(response_fn);
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let response_fn = response_fn.clone();
            let counter = counter.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let response_fn = response_fn.clone();
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let api_key = req
                            .headers()
                            .get(hyper::header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let bytes = req.into_body().collect().await.unwrap().to_bytes();
                        let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);

                        let (status, text) = response_fn(MockRequest { api_key, body });
                        let mut response = Response::new(Full::new(Bytes::from(text)));
                        *response.status_mut() = status;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    MockServer { port, requests }
}

pub async fn response_json(response: crate::handler::HandlerResponse) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
