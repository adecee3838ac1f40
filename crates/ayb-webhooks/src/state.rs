use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;

use ayb_realtime::Event;

pub struct WebhooksState {
    pub pool: PgPool,
    pub client: reqwest::Client,
    pub queue_tx: mpsc::Sender<Event>,
    pub retention_days: i64,
    pub request_timeout: Duration,
}

impl WebhooksState {
    pub fn new(
        pool: PgPool,
        queue_tx: mpsc::Sender<Event>,
        retention_days: i64,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ayb-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client with default TLS backend");
        Self {
            pool,
            client,
            queue_tx,
            retention_days,
            request_timeout,
        }
    }

    /// Non-blocking enqueue: a full queue drops the event with a warning.
    /// The triggers plus the persistent delivery log remain the source of
    /// truth, so a dropped dispatch never loses data, only timeliness.
    pub fn enqueue(&self, event: Event) {
        if let Err(err) = self.queue_tx.try_send(event) {
            tracing::warn!(error = %err, "webhook dispatch queue full, dropping event");
        }
    }
}
