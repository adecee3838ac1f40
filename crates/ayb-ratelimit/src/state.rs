use std::sync::Arc;

use crate::registry::RateLimiterRegistry;

#[derive(Clone)]
pub struct RateLimiterState {
    pub registry: Arc<RateLimiterRegistry>,
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RateLimiterRegistry::new()),
        }
    }
}
