//! C8 — Change Notifier.
//!
//! Reads `_ayb_notify_row_change` payloads off a dedicated listener
//! connection and republishes them on an in-process `broadcast` channel.
//! `broadcast`'s own fixed-capacity ring buffer is exactly the backpressure
//! policy the design calls for: a sender never blocks, and a receiver that
//! falls behind sees `Lagged(n)` rather than every event ever sent — the
//! oldest values are silently overwritten once the buffer is full.

use ayb_schema::watcher::ROW_CHANGED_CHANNEL;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;

use crate::event::Event;
use crate::error::RealtimeError;

/// Runs until the listener connection is lost. Intended to be spawned as a
/// long-lived background task alongside the schema watcher; a malformed
/// notification payload is logged and skipped rather than treated as fatal,
/// since a single bad row should never take the whole bus down.
pub async fn run(pool: sqlx::PgPool, tx: broadcast::Sender<Event>) -> Result<(), RealtimeError> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(ROW_CHANGED_CHANNEL).await?;

    loop {
        let notification = listener.recv().await?;
        match Event::from_notify_payload(notification.payload()) {
            Ok(event) => {
                // No active receivers is not an error — it just means no one
                // is subscribed to realtime right now.
                let _ = tx.send(event);
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed row-change notification");
            }
        }
    }
}
