//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use recsys_engine::{ConsumerRuntime, EventPublisher, QueryService};
use recsys_storage::Store;
use tokio::sync::RwLock;

use crate::middleware::AuthClient;

/// Consumer runtime slot. `main` takes the runtime out on shutdown; health reads it.
pub type SharedRuntime = Arc<RwLock<Option<ConsumerRuntime>>>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Store used by readiness probes. Reads go through `query`.
    pub store: Arc<dyn Store>,
    pub query: QueryService,
    pub auth: Arc<dyn AuthClient>,
    /// Present only when the in-process bus feeds the workers.
    pub publisher: Option<EventPublisher>,
    pub runtime: SharedRuntime,
    pub start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("query", &self.query)
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, query: QueryService, auth: Arc<dyn AuthClient>) -> Self {
        Self {
            store,
            query,
            auth,
            publisher: None,
            runtime: Arc::new(RwLock::new(None)),
            start_time: Instant::now(),
        }
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_runtime(mut self, runtime: ConsumerRuntime) -> Self {
        self.runtime = Arc::new(RwLock::new(Some(runtime)));
        self
    }
}

crate::impl_from_ref!(QueryService, query);
crate::impl_from_ref!(Arc<dyn Store>, store);
crate::impl_from_ref!(Arc<dyn AuthClient>, auth);
crate::impl_from_ref!(Option<EventPublisher>, publisher);
crate::impl_from_ref!(SharedRuntime, runtime);
