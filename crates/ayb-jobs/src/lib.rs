//! C11 — Job Runner + Scheduler: a `FOR UPDATE SKIP LOCKED` job queue with
//! lease-based crash recovery and a cron materializer on top.

pub mod error;
pub mod handlers;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod sweeper;
pub mod worker;

pub use error::JobsError;
pub use model::{Job, JobState, Schedule};
pub use state::{CancelRegistry, JobsState};
pub use worker::{HandlerRegistry, HandlerRegistryBuilder, JobHandler, JobWorker};
