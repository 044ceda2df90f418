//! HTTP endpoints.
pub mod collect_usage;
pub mod ingest_events;
pub mod query_usage;

use crate::collect::UsageCollector;
use crate::config::{CollectionConfig, HandlerKind};
use crate::handler::Handler;
use crate::upstream::UsageClient;
use collect_usage::CollectUsageHandler;
use directory::Stores;
use ingest_events::IngestEventsHandler;
use query_usage::QueryUsageHandler;
use std::sync::Arc;

/// Everything the endpoints are built from.
#[derive(Clone)]
pub struct HandlerContext {
    pub stores: Stores,
    pub client: Arc<dyn UsageClient>,
    pub collection: CollectionConfig,
}

impl HandlerContext {
    pub fn collector(&self) -> UsageCollector {
        UsageCollector::new(
            self.stores.directory.clone(),
            self.client.clone(),
            self.stores.usage.clone(),
            &self.collection,
        )
    }

    pub fn make_handler(&self, kind: HandlerKind) -> Arc<dyn Handler> {
        match kind {
            HandlerKind::CollectUsage => Arc::new(CollectUsageHandler::new(
                Arc::new(self.collector()),
                self.collection.clone(),
            )),
            HandlerKind::QueryUsage => Arc::new(QueryUsageHandler::new(
                self.stores.directory.clone(),
                self.client.clone(),
                self.collection.default_tenant.clone(),
            )),
            HandlerKind::IngestEvents => Arc::new(IngestEventsHandler::new(
                self.stores.directory.clone(),
                self.stores.events.clone(),
            )),
        }
    }
}
