//! C12 — Rate Limiter: a per-`appId` token bucket held in memory, enforced
//! as axum middleware ahead of the session binder. Built on `governor`'s
//! keyed rate limiter, which — with the `dashmap` feature this workspace
//! enables — both shards its state across a `DashMap` for lock-free reads
//! and exposes `retain_recent` for the idle-bucket sweeper.

pub mod middleware;
pub mod registry;
pub mod state;

pub use middleware::enforce;
pub use registry::RateLimiterRegistry;
pub use state::RateLimiterState;
