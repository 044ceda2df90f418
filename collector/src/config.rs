use crate::metric::{InvalidMetrics, Metric, parse_metrics};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://analytics-api.voiceflow.com/v2/query/usage";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route path must start with '/': {0}")]
    InvalidRoutePath(String),

    #[error("Duplicate route path: {0}")]
    DuplicateRoute(String),

    #[error("max_concurrent_tasks must be greater than 0")]
    InvalidConcurrency,

    #[error("max_body_bytes must be greater than 0")]
    InvalidBodyLimit,

    #[error("Invalid collection.metrics: {0}")]
    InvalidMetrics(#[from] InvalidMetrics),
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Analytics API endpoint
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Defaults to [`DEFAULT_UPSTREAM_URL`].
    #[serde(default)]
    pub url: Option<Url>,
    /// Whole-request timeout. Unset leaves only the transport's own limits.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Defaults applied to usage requests
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CollectionConfig {
    /// Tenant used by the single-tenant query when the request names none.
    #[serde(default)]
    pub default_tenant: Option<String>,
    /// Echoed in collection reports. The default window always follows the
    /// host's local clock.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Metrics collected when a request names none. Empty means all.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Upper bound on upstream queries in flight per run. Unset is unbounded.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

impl CollectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        parse_metrics(&self.metrics)?;
        if self.max_concurrent_tasks == Some(0) {
            return Err(ValidationError::InvalidConcurrency);
        }
        Ok(())
    }

    pub fn default_metrics(&self) -> Vec<Metric> {
        match parse_metrics(&self.metrics) {
            Ok(metrics) if !metrics.is_empty() => metrics,
            _ => Metric::ALL.to_vec(),
        }
    }
}

/// Endpoint implementations a route can point at
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    CollectUsage,
    QueryUsage,
    IngestEvents,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Route {
    pub path: String,
    pub handler: HandlerKind,
}

pub fn default_routes() -> Vec<Route> {
    vec![
        Route {
            path: "/api/cron/usage".into(),
            handler: HandlerKind::CollectUsage,
        },
        Route {
            path: "/api/usage".into(),
            handler: HandlerKind::QueryUsage,
        },
        Route {
            path: "/api/events".into(),
            handler: HandlerKind::IngestEvents,
        },
    ]
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<Route>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.collection.validate()?;

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        let mut paths = HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(ValidationError::InvalidRoutePath(route.path.clone()));
            }
            if !paths.insert(route.path.as_str()) {
                return Err(ValidationError::DuplicateRoute(route.path.clone()));
            }
        }

        Ok(())
    }
}
