use std::sync::Arc;
use std::time::Duration;

use crate::state::WebhooksState;

/// Deletes delivery rows past retention on a fixed interval. Runs for the
/// lifetime of the process; a failed prune is logged and retried next tick
/// rather than treated as fatal.
pub async fn run(state: Arc<WebhooksState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sqlx::query(
            "DELETE FROM _ayb_webhook_deliveries WHERE delivered_at < now() - ($1 || ' days')::interval",
        )
        .bind(state.retention_days)
        .execute(&state.pool)
        .await
        {
            Ok(result) => {
                if result.rows_affected() > 0 {
                    tracing::info!(deleted = result.rows_affected(), "pruned webhook deliveries");
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to prune webhook deliveries"),
        }
    }
}
