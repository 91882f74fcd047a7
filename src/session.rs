//! One editing session: a fresh identity cache, a coordinator over the
//! shared store, and the debounced scheduler in front of it.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::cache::IdentityCache;
use crate::config::SyncConfig;
use crate::coordinator::ReconciliationCoordinator;
use crate::scheduler::SaveScheduler;
use crate::store::LogStore;

pub struct Session {
    cache: Arc<IdentityCache>,
    coordinator: Arc<ReconciliationCoordinator>,
    scheduler: SaveScheduler,
}

impl Session {
    /// Worker tasks are spawned onto `runtime`.
    pub fn start(store: Arc<dyn LogStore>, config: &SyncConfig, runtime: Handle) -> Self {
        let cache = Arc::new(IdentityCache::new());
        let coordinator = Arc::new(ReconciliationCoordinator::new(
            store,
            Arc::clone(&cache),
            config.reconcile_options(),
        ));
        let scheduler = SaveScheduler::new(Arc::clone(&coordinator), config.debounce(), runtime);
        info!(
            debounce_ms = config.debounce_ms,
            validate_cached_ids = config.validate_cached_ids,
            "started editing session"
        );
        Self {
            cache,
            coordinator,
            scheduler,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<ReconciliationCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }
}
