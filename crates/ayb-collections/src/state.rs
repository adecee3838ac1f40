use std::sync::Arc;

use ayb_schema::CacheHolder;
use sqlx::PgPool;

#[derive(Clone)]
pub struct CollectionsState {
    pub pool: PgPool,
    pub cache: Arc<CacheHolder>,
}
