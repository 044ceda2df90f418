use crate::errors::StoreResult;
use crate::types::{EventRow, PullRecord, TenantConfig, TenantProject, TenantWithToken, UsageRow};
use async_trait::async_trait;

/// Read access to tenants, their credentials and projects.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Every active project whose tenant has an active credential, ordered by
    /// tenant slug and then project creation order.
    async fn list_active_projects(&self) -> StoreResult<Vec<TenantProject>>;

    /// The tenant with `slug`, its newest active credential and its active
    /// projects. `None` when the tenant is unknown or lacks either.
    async fn fetch_tenant_config(&self, slug: &str) -> StoreResult<Option<TenantConfig>>;

    /// Resolves an active event write token to its tenant.
    async fn tenant_for_write_token(&self, token: &str) -> StoreResult<Option<TenantWithToken>>;

    /// Origins allowed to submit events for the tenant. Empty means any origin.
    async fn allowed_origins(&self, tenant_id: &str) -> StoreResult<Vec<String>>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Sink for collected usage.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Inserts rows, skipping any whose dedupe key is already stored.
    /// Returns the number of rows actually inserted.
    async fn upsert_usage(&self, rows: &[UsageRow]) -> StoreResult<u64>;

    /// Appends one record to the pull log.
    async fn append_pull(&self, record: &PullRecord) -> StoreResult<()>;
}

/// Sink for ingested client events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts events, ignoring ids that are already stored.
    /// Returns the number of events actually inserted.
    async fn insert_events(&self, rows: &[EventRow]) -> StoreResult<u64>;
}
