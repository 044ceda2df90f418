use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub slug: String,
    pub name: String,
}

impl Tenant {
    pub fn new<I, S, N>(id: I, slug: S, name: N) -> Self
    where
        I: Into<String>,
        S: Into<String>,
        N: Into<String>,
    {
        Tenant {
            id: id.into(),
            slug: slug.into(),
            name: name.into(),
        }
    }
}

/// An analytics API credential. The key is stored encrypted and must go
/// through [`crate::crypto::decrypt_secret`] before use.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub tenant_id: String,
    pub api_key_encrypted: String,
    /// Default environment used when a request does not name one.
    pub environment_id: Option<String>,
    pub active: bool,
    pub rotated_at: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("api_key_encrypted", &"<redacted>")
            .field("environment_id", &self.environment_id)
            .field("active", &self.active)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    /// Identifier assigned by the analytics vendor.
    pub project_id: String,
    pub display_name: Option<String>,
    pub active: bool,
}

/// One eligible (tenant, credential, project) entry of the directory.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantProject {
    pub tenant: Tenant,
    pub credential: Credential,
    pub project: Project,
}

/// Everything needed to query usage for a single tenant.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantConfig {
    pub tenant: Tenant,
    pub credential: Credential,
    /// Active projects in creation order.
    pub projects: Vec<Project>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteToken {
    pub id: String,
    pub tenant_id: String,
    pub token: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TenantWithToken {
    pub tenant: Tenant,
    pub token: WriteToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullStatus {
    Succeeded,
    Failed,
}

impl PullStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PullStatus::Succeeded => "succeeded",
            PullStatus::Failed => "failed",
        }
    }
}

/// A flattened slice of an upstream usage payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub tenant_id: String,
    pub project_id: String,
    pub metric: String,
    pub period: Option<String>,
    pub data: JsonValue,
}

impl UsageRow {
    /// Stable identity of the row: sha256 over the canonical JSON encoding of
    /// (tenant, project, metric, period, data).
    pub fn dedupe_key(&self) -> String {
        let key = JsonValue::Array(vec![
            JsonValue::from(self.tenant_id.as_str()),
            JsonValue::from(self.project_id.as_str()),
            JsonValue::from(self.metric.as_str()),
            self.period
                .as_deref()
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            canonicalize(&self.data),
        ]);

        let mut hasher = Sha256::new();
        hasher.update(key.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

// Rebuilds objects with sorted keys so the encoding does not depend on the
// order in which the upstream emitted them.
fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// One entry of the append-only pull log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullRecord {
    pub tenant_id: String,
    pub project_id: String,
    pub metric: String,
    pub window_start: String,
    pub window_end: String,
    pub cursor: Option<JsonValue>,
    pub status: PullStatus,
    pub error: Option<JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub tenant_id: String,
    pub project_id: Option<String>,
    pub event_name: String,
    pub occurred_at: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub properties: serde_json::Map<String, JsonValue>,
}
