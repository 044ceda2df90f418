//! Tenant directory and persistence for collected usage and client events.
pub mod config;
pub mod crypto;
pub mod errors;
pub mod memory;
pub mod metrics_defs;
pub mod sqlite;
pub mod store;
pub mod types;

use async_trait::async_trait;
use config::StoreConfig;
use errors::StoreResult;
use memory::MemoryStore;
use shared::admin_service::ReadinessProbe;
use sqlite::SqliteStore;
use std::sync::Arc;
use store::{EventStore, TenantDirectory, UsageStore};

/// The three store roles, possibly backed by the same object.
#[derive(Clone)]
pub struct Stores {
    pub directory: Arc<dyn TenantDirectory>,
    pub usage: Arc<dyn UsageStore>,
    pub events: Arc<dyn EventStore>,
}

impl Stores {
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Stores {
            directory: store.clone(),
            usage: store.clone(),
            events: store,
        }
    }

    pub fn from_sqlite(store: Arc<SqliteStore>) -> Self {
        Stores {
            directory: store.clone(),
            usage: store.clone(),
            events: store,
        }
    }

    pub fn readiness(&self) -> Arc<dyn ReadinessProbe> {
        Arc::new(DirectoryProbe {
            directory: self.directory.clone(),
        })
    }
}

pub async fn connect(config: &StoreConfig) -> StoreResult<Stores> {
    match config {
        StoreConfig::Sqlite {
            url,
            max_connections,
            run_migrations,
        } => {
            let store = SqliteStore::connect(url, *max_connections).await?;
            if *run_migrations {
                store.migrate().await?;
            }
            Ok(Stores::from_sqlite(Arc::new(store)))
        }
        StoreConfig::Memory { tenants } => {
            tracing::warn!(
                tenants = tenants.len(),
                "Using the in-memory store, nothing will be persisted across restarts"
            );
            Ok(Stores::from_memory(Arc::new(MemoryStore::from_seeds(
                tenants,
            ))))
        }
    }
}

struct DirectoryProbe {
    directory: Arc<dyn TenantDirectory>,
}

#[async_trait]
impl ReadinessProbe for DirectoryProbe {
    async fn is_ready(&self) -> bool {
        match self.directory.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store is not reachable");
                false
            }
        }
    }
}
