//! Non-durable store backing local development and tests.
use crate::config::TenantSeed;
use crate::errors::StoreResult;
use crate::store::{EventStore, TenantDirectory, UsageStore};
use crate::types::{
    Credential, EventRow, Project, PullRecord, Tenant, TenantConfig, TenantProject,
    TenantWithToken, UsageRow, WriteToken,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Default)]
struct MemoryState {
    tenants: Vec<Tenant>,
    credentials: Vec<Credential>,
    projects: Vec<Project>,
    write_tokens: Vec<WriteToken>,
    origins: Vec<(String, String)>,
    usage_keys: HashSet<String>,
    usage_rows: Vec<UsageRow>,
    pulls: Vec<PullRecord>,
    event_ids: HashSet<String>,
    events: Vec<EventRow>,
}

impl MemoryState {
    // Newest active credential wins, matching the SQLite backend.
    fn active_credential(&self, tenant_id: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .rev()
            .find(|c| c.tenant_id == tenant_id && c.active)
    }

    fn tenant_by_id(&self, tenant_id: &str) -> Option<&Tenant> {
        self.tenants.iter().find(|t| t.id == tenant_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[TenantSeed]) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.seed_tenant(seed);
        }
        store
    }

    /// Inserts a tenant with one credential plus its projects, tokens and origins.
    pub fn seed_tenant(&self, seed: &TenantSeed) -> Tenant {
        let tenant = Tenant::new(
            new_id(),
            seed.slug.clone(),
            seed.name.clone().unwrap_or_else(|| seed.slug.clone()),
        );
        self.insert_tenant(tenant.clone());
        self.insert_credential(Credential {
            id: new_id(),
            tenant_id: tenant.id.clone(),
            api_key_encrypted: seed.api_key.clone(),
            environment_id: seed.environment_id.clone(),
            active: true,
            rotated_at: None,
        });
        for project_id in &seed.projects {
            self.insert_project(Project {
                id: new_id(),
                tenant_id: tenant.id.clone(),
                project_id: project_id.clone(),
                display_name: None,
                active: true,
            });
        }
        for token in &seed.write_tokens {
            self.insert_write_token(WriteToken {
                id: new_id(),
                tenant_id: tenant.id.clone(),
                token: token.clone(),
                active: true,
                created_at: chrono::Utc::now().to_rfc3339(),
            });
        }
        for origin in &seed.allowed_origins {
            self.insert_origin(&tenant.id, origin);
        }
        tenant
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().tenants.push(tenant);
    }

    pub fn insert_credential(&self, credential: Credential) {
        self.state.lock().credentials.push(credential);
    }

    pub fn insert_project(&self, project: Project) {
        self.state.lock().projects.push(project);
    }

    pub fn insert_write_token(&self, token: WriteToken) {
        self.state.lock().write_tokens.push(token);
    }

    pub fn insert_origin(&self, tenant_id: &str, origin: &str) {
        self.state
            .lock()
            .origins
            .push((tenant_id.to_string(), origin.to_string()));
    }

    pub fn usage_rows(&self) -> Vec<UsageRow> {
        self.state.lock().usage_rows.clone()
    }

    pub fn pulls(&self) -> Vec<PullRecord> {
        self.state.lock().pulls.clone()
    }

    pub fn events(&self) -> Vec<EventRow> {
        self.state.lock().events.clone()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn list_active_projects(&self) -> StoreResult<Vec<TenantProject>> {
        let state = self.state.lock();

        let mut tenants: Vec<&Tenant> = state.tenants.iter().collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));

        let mut entries = Vec::new();
        for tenant in tenants {
            let Some(credential) = state.active_credential(&tenant.id) else {
                continue;
            };
            for project in state
                .projects
                .iter()
                .filter(|p| p.tenant_id == tenant.id && p.active)
            {
                entries.push(TenantProject {
                    tenant: tenant.clone(),
                    credential: credential.clone(),
                    project: project.clone(),
                });
            }
        }

        Ok(entries)
    }

    async fn fetch_tenant_config(&self, slug: &str) -> StoreResult<Option<TenantConfig>> {
        let state = self.state.lock();

        let Some(tenant) = state.tenants.iter().find(|t| t.slug == slug) else {
            return Ok(None);
        };
        let Some(credential) = state.active_credential(&tenant.id) else {
            return Ok(None);
        };
        let projects: Vec<Project> = state
            .projects
            .iter()
            .filter(|p| p.tenant_id == tenant.id && p.active)
            .cloned()
            .collect();
        if projects.is_empty() {
            return Ok(None);
        }

        Ok(Some(TenantConfig {
            tenant: tenant.clone(),
            credential: credential.clone(),
            projects,
        }))
    }

    async fn tenant_for_write_token(&self, token: &str) -> StoreResult<Option<TenantWithToken>> {
        let state = self.state.lock();

        let found = state
            .write_tokens
            .iter()
            .find(|t| t.token == token && t.active)
            .and_then(|t| {
                state.tenant_by_id(&t.tenant_id).map(|tenant| TenantWithToken {
                    tenant: tenant.clone(),
                    token: t.clone(),
                })
            });

        Ok(found)
    }

    async fn allowed_origins(&self, tenant_id: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock();
        let mut origins: Vec<String> = state
            .origins
            .iter()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, origin)| origin.clone())
            .collect();
        origins.sort();
        Ok(origins)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn upsert_usage(&self, rows: &[UsageRow]) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let mut inserted = 0;
        for row in rows {
            if state.usage_keys.insert(row.dedupe_key()) {
                state.usage_rows.push(row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn append_pull(&self, record: &PullRecord) -> StoreResult<()> {
        self.state.lock().pulls.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_events(&self, rows: &[EventRow]) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let mut inserted = 0;
        for row in rows {
            if state.event_ids.insert(row.event_id.clone()) {
                state.events.push(row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
