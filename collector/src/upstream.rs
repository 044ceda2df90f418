//! Client for the analytics vendor's usage query endpoint.
use crate::config::{DEFAULT_UPSTREAM_URL, UpstreamConfig};
use crate::metric::Metric;
use crate::window::Window;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Vendor pagination token, passed back verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Number(serde_json::Number),
    Text(String),
}

impl Cursor {
    /// Empty strings and zero are not sent upstream.
    pub fn is_set(&self) -> bool {
        match self {
            Cursor::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Cursor::Text(s) => !s.is_empty(),
        }
    }
}

/// Decrypted vendor API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        ApiKey(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// One metric query for one project.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageQuery {
    pub project_id: String,
    pub metric: Metric,
    pub window: Window,
    pub limit: u32,
    pub cursor: Option<Cursor>,
    pub environment_id: Option<String>,
}

impl UsageQuery {
    pub fn to_body(&self) -> JsonValue {
        let mut resource = json!({
            "type": "project",
            "id": self.project_id,
        });
        if let Some(environment_id) = &self.environment_id {
            resource["environmentID"] = json!(environment_id);
        }

        let mut data = json!({
            "name": self.metric,
            "filter": {
                "startTime": self.window.start_time(),
                "endTime": self.window.end_time(),
                "limit": self.limit,
            },
        });
        if let Some(cursor) = self.cursor.as_ref().filter(|c| c.is_set()) {
            data["cursor"] = json!(cursor);
        }

        json!({
            "resources": [resource],
            "data": data,
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// The API answered with a non-success status.
    #[error("Analytics API request failed")]
    Upstream { status: u16, detail: JsonValue },

    /// The request never produced a response.
    #[error("{0}")]
    Transport(String),

    /// A success response whose body is not JSON.
    #[error("Invalid analytics API response: {0}")]
    Decode(String),
}

/// Picks the most useful part of an error payload: its `error` string, else
/// its `message` string, else the whole payload.
pub fn error_detail(payload: JsonValue) -> JsonValue {
    if let Some(error) = payload.get("error").and_then(JsonValue::as_str) {
        return JsonValue::from(error);
    }
    if let Some(message) = payload.get("message").and_then(JsonValue::as_str) {
        return JsonValue::from(message);
    }
    payload
}

#[async_trait]
pub trait UsageClient: Send + Sync {
    /// Runs one query. Success returns the decoded payload verbatim.
    async fn query(&self, query: &UsageQuery, api_key: &ApiKey) -> Result<JsonValue, UpstreamError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ClientSetupError {
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct HttpUsageClient {
    client: reqwest::Client,
    url: Url,
}

impl HttpUsageClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ClientSetupError> {
        let url = match &config.url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_UPSTREAM_URL)?,
        };

        let mut builder = reqwest::Client::builder();
        if let Some(timeout_secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }

        Ok(HttpUsageClient {
            client: builder.build()?,
            url,
        })
    }
}

#[async_trait]
impl UsageClient for HttpUsageClient {
    async fn query(&self, query: &UsageQuery, api_key: &ApiKey) -> Result<JsonValue, UpstreamError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(http::header::ACCEPT, "application/json")
            .header(http::header::AUTHORIZATION, api_key.expose())
            .json(&query.to_body())
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if !status.is_success() {
            let detail = match serde_json::from_slice::<JsonValue>(&body) {
                Ok(payload) => error_detail(payload),
                Err(_) => JsonValue::from(String::from_utf8_lossy(&body).into_owned()),
            };
            tracing::debug!(
                status = status.as_u16(),
                project_id = %query.project_id,
                metric = %query.metric,
                "Analytics API returned an error"
            );
            return Err(UpstreamError::Upstream {
                status: status.as_u16(),
                detail,
            });
        }

        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
