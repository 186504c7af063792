use std::sync::Arc;

use crate::db::MetadataStore;
use crate::services::{queue::JobQueue, rate_limiter::RateLimiter, storage::ObjectStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub metadata: Arc<dyn MetadataStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        metadata: Arc<dyn MetadataStore>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            storage,
            queue,
            metadata,
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}
