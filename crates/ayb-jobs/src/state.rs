use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Tracks the cancellation token for every job currently executing on some
/// worker, so an admin-triggered cancel can reach the in-flight handler
/// instead of only flipping a database column.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<i64, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn register(&self, job_id: i64, token: CancellationToken) {
        self.inner
            .lock()
            .expect("cancel registry mutex poisoned")
            .insert(job_id, token);
    }

    pub fn unregister(&self, job_id: i64) {
        self.inner
            .lock()
            .expect("cancel registry mutex poisoned")
            .remove(&job_id);
    }

    /// Signals the handler running `job_id`, if any worker currently has it
    /// claimed. Returns whether a running handler was found.
    pub fn cancel(&self, job_id: i64) -> bool {
        match self
            .inner
            .lock()
            .expect("cancel registry mutex poisoned")
            .get(&job_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct JobsState {
    pub pool: PgPool,
    /// Cancelled on graceful shutdown; every in-flight handler's token is a
    /// child of this one, so cancelling it reaches all of them at once.
    pub shutdown: CancellationToken,
    pub cancellations: CancelRegistry,
}

impl JobsState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            shutdown: CancellationToken::new(),
            cancellations: CancelRegistry::default(),
        }
    }
}
