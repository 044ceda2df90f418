use crate::collect::{CollectError, UsageCollector, parse_collection_request};
use crate::config::CollectionConfig;
use crate::errors::GatewayError;
use crate::handler::{Handler, HandlerResponse, request_params};
use crate::task::ResolveError;
use async_trait::async_trait;
use chrono::Local;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use shared::http::{make_json_error, make_json_response};
use std::sync::Arc;

/// Fans a usage query out over every matching tenant, project and metric.
pub struct CollectUsageHandler {
    collector: Arc<UsageCollector>,
    config: CollectionConfig,
}

impl CollectUsageHandler {
    pub fn new(collector: Arc<UsageCollector>, config: CollectionConfig) -> Self {
        Self { collector, config }
    }
}

#[async_trait]
impl Handler for CollectUsageHandler {
    fn name(&self) -> &'static str {
        "collect_usage"
    }

    fn allowed_methods(&self) -> &'static [Method] {
        &[Method::GET, Method::POST]
    }

    async fn handle(&self, request: Request<Bytes>) -> HandlerResponse {
        let params = request_params(&request);
        let collection = match parse_collection_request(&params, &self.config, &Local::now()) {
            Ok(collection) => collection,
            Err(e) => return make_json_error(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        match self.collector.collect(collection).await {
            Ok(report) => make_json_response::<_, GatewayError>(StatusCode::OK, &report),
            Err(CollectError::Resolve(e @ ResolveError::NoMatchingProjects)) => {
                make_json_error(StatusCode::NOT_FOUND, &e.to_string())
            }
            Err(e @ CollectError::Resolve(ResolveError::EmptyDirectory)) => {
                make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
            Err(e @ (CollectError::Directory(_) | CollectError::Aborted(_))) => {
                tracing::error!(error = %e, "Usage collection aborted");
                make_json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }
}
