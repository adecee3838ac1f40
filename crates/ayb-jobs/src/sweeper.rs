use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::queue;

/// Requeues jobs whose lease expired without the worker that claimed them
/// ever completing or failing them — the crash-recovery half of C11.
pub async fn run(pool: Arc<PgPool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match queue::sweep_expired_leases(&pool).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "requeued jobs with expired leases")
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "lease sweep failed"),
        }
    }
}
