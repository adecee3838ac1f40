//! Worker pool side of C11: claims one job at a time per worker and runs it
//! against whatever handler the operator registered for its `job_type`.
//! Grounded on `hook_worker::worker::WebhookWorker`'s poll-claim-execute
//! loop shape, generalized from a single hardcoded job kind to a registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::model::Job;
use crate::queue;
use crate::state::CancelRegistry;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// `cancel` fires when the runner is shutting down or an admin canceled
    /// this job while it was running. Handlers are expected to check it on
    /// their own long-running work and return early; a handler that ignores
    /// it simply runs to completion, recovered later via lease expiry.
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> Result<(), String>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

impl HandlerRegistry {
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

pub struct JobWorker {
    pub id: String,
    pub pool: PgPool,
    pub lease: ChronoDuration,
    pub poll_interval: StdDuration,
    pub handlers: HandlerRegistry,
    pub shutdown: CancellationToken,
    pub cancellations: CancelRegistry,
}

impl JobWorker {
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(worker = %self.id, "shutdown requested, stopping claim loop");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match queue::claim(&self.pool, &self.id, self.lease).await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => {}
                Err(err) => tracing::error!(worker = %self.id, error = %err, "job claim failed"),
            }
        }
    }

    async fn execute(&self, job: Job) {
        let token = self.shutdown.child_token();
        self.cancellations.register(job.id, token.clone());

        let outcome = match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(&job, token).await,
            None => Err(format!("no handler registered for job_type {:?}", job.job_type)),
        };
        self.cancellations.unregister(job.id);

        let result = match outcome {
            Ok(()) => queue::complete(&self.pool, job.id).await,
            Err(error) => {
                tracing::warn!(job_id = job.id, job_type = %job.job_type, error = %error, "job execution failed");
                queue::fail(&self.pool, &job, &error).await
            }
        };
        if let Err(err) = result {
            tracing::error!(job_id = job.id, error = %err, "failed to persist job outcome");
        }
    }
}
