//! Usage collection and event ingestion for a multi-tenant analytics gateway.
pub mod api;
pub mod collect;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod handler;
pub mod metric;
pub mod metrics_defs;
pub mod outcome;
pub mod params;
pub mod persistence;
pub mod report;
pub mod router;
pub mod task;
pub mod upstream;
pub mod window;

#[cfg(test)]
mod testutils;

use api::HandlerContext;
use directory::Stores;
use errors::GatewayError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use router::Router;
use shared::admin_service::AdminService;
use shared::http::{make_json_error, run_http_service};
use shared::{gauge, histogram};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use upstream::{HttpUsageClient, UsageClient};

/// Serves the configured routes and the admin listener until either fails.
pub async fn run(config: config::Config, stores: Stores) -> Result<(), GatewayError> {
    config.validate()?;

    let client: Arc<dyn UsageClient> = Arc::new(HttpUsageClient::new(&config.upstream)?);
    let context = HandlerContext {
        stores: stores.clone(),
        client,
        collection: config.collection.clone(),
    };
    let service = GatewayService::new(Router::new(&config.routes, &context), config.max_body_bytes);

    let gateway_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<GatewayError>::new(stores.readiness()),
    );

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}

/// Buffers the request body, dispatches through the router and records
/// request metrics.
pub struct GatewayService {
    router: Router,
    max_body_bytes: usize,
}

impl GatewayService {
    pub fn new(router: Router, max_body_bytes: usize) -> Self {
        Self {
            router,
            max_body_bytes,
        }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move {
            let started = Instant::now();
            let inflight = InflightGuard::new();

            let (parts, body) = req.into_parts();
            let (handler, response) = match Limited::new(body, max_body_bytes).collect().await {
                Ok(collected) => {
                    router
                        .route(Request::from_parts(parts, collected.to_bytes()))
                        .await
                }
                Err(e) => ("body", body_error_response(e, max_body_bytes)),
            };

            drop(inflight);
            histogram!(
                REQUEST_DURATION,
                "status" => response.status().as_u16().to_string(),
                "handler" => handler
            )
            .record(started.elapsed().as_secs_f64());

            Ok(response)
        })
    }
}

/// Counts a request as in flight until dropped, including when the
/// connection goes away mid-request.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

fn body_error_response(
    error: Box<dyn std::error::Error + Send + Sync>,
    max_body_bytes: usize,
) -> Response<BoxBody<Bytes, GatewayError>> {
    if error.is::<http_body_util::LengthLimitError>() {
        let error = GatewayError::PayloadTooLarge(max_body_bytes);
        tracing::debug!(error = %error, "Rejected request body");
        return make_json_error(StatusCode::PAYLOAD_TOO_LARGE, &error.to_string());
    }

    let error = GatewayError::RequestBodyError(error.to_string());
    tracing::debug!(error = %error, "Failed to read request body");
    make_json_error(StatusCode::BAD_REQUEST, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, default_routes};
    use crate::testutils::{StubClient, seeded_store};
    use http_body_util::Full;
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioExecutor;
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::net::TcpListener;

    /// Routes every gauge to one shared cell.
    #[derive(Default)]
    struct GaugeRecorder {
        gauge: Arc<AtomicU64>,
    }

    impl GaugeRecorder {
        fn value(&self) -> f64 {
            f64::from_bits(self.gauge.load(Ordering::SeqCst))
        }
    }

    impl Recorder for GaugeRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::from_arc(self.gauge.clone())
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_inflight_gauge_released_on_drop() {
        let recorder = GaugeRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let first = InflightGuard::new();
            let second = InflightGuard::new();
            assert_eq!(recorder.value(), 2.0);

            // An abandoned request drops its guard without finishing
            drop(first);
            assert_eq!(recorder.value(), 1.0);
            drop(second);
        });
        assert_eq!(recorder.value(), 0.0);
    }

    /// Serves a gateway over a real socket and returns its port.
    async fn start_gateway(max_body_bytes: usize) -> u16 {
        let context = HandlerContext {
            stores: Stores::from_memory(Arc::new(seeded_store())),
            client: Arc::new(StubClient::ok()),
            collection: CollectionConfig::default(),
        };
        let service = Arc::new(GatewayService::new(
            Router::new(&default_routes(), &context),
            max_body_bytes,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let service = service.clone();
                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(hyper_util::rt::TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        port
    }

    async fn post_events(port: u16, body: String) -> (StatusCode, JsonValue) {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let request = Request::builder()
            .method("POST")
            .uri(format!("http://127.0.0.1:{port}/api/events"))
            .header("authorization", "Bearer acme-token")
            .body(Full::new(Bytes::from(body)))
            .unwrap();

        let response = client.request(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_events_over_http() {
        let port = start_gateway(64 * 1024).await;
        let body = json!({"events": [{
            "event_id": "6f1c1c2e-8a4b-4c6d-9e7f-0a1b2c3d4e5f",
            "event_name": "signup",
        }]});

        let (status, json) = post_events(port, body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accepted"], 1);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let port = start_gateway(32).await;
        let body = json!({"events": [{"event_name": "x".repeat(64)}]});

        let (status, json) = post_events(port, body.to_string()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json, json!({"error": "Request body exceeds 32 bytes"}));
    }
}
