use order_cache::OrderCacheService;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderCacheService>,
    /// Deadline for one lookup, store read-through included
    pub lookup_timeout: Duration,
}

impl AppState {
    pub fn new(orders: Arc<OrderCacheService>, lookup_timeout: Duration) -> Self {
        Self {
            orders,
            lookup_timeout,
        }
    }
}
