//! `ayb-server` — the single binary wiring every component in §4 of the
//! design together: migrations, schema cache, schema watcher, principal
//! resolver, session binder, query builder, collections service, change
//! notifier, realtime hub, webhook dispatcher, job runner + scheduler, and
//! rate limiter, all behind one axum [`Router`].
//!
//! Grounded on `hook_janitor::main`'s shape: load config, build the
//! long-running pieces, spawn them, serve HTTP, and let a graceful
//! shutdown signal (not a task racing the server, since this binary has
//! many more background tasks than the teacher's one cleanup loop) bring
//! everything down together.

mod admin_auth;
mod router;

use std::sync::Arc;
use std::time::Duration;

use ayb_auth::{AuthState, TokenIssuer};
use ayb_jobs::worker::{HandlerRegistryBuilder, JobWorker};
use ayb_jobs::JobsState;
use ayb_ratelimit::RateLimiterState;
use ayb_realtime::{Event, HubState, EVENT_BUS_CAPACITY};
use ayb_webhooks::WebhooksState;
use chrono::Duration as ChronoDuration;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;

use admin_auth::AdminAuthState;

const ADMIN_TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ayb_config::Config::init_from_env().expect("failed to load configuration from env");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to connect to database");
            std::process::exit(1);
        });

    if let Err(err) = ayb_db::migrate::run_system_migrations(&pool).await {
        tracing::error!(error = %err, "system migrations failed");
        std::process::exit(1);
    }
    if let Err(err) = ayb_db::migrate::run_user_migrations(&pool, &config.user_migrations_dir).await {
        tracing::error!(error = %err, "user migrations failed");
        std::process::exit(1);
    }

    let cache = Arc::new(ayb_schema::CacheHolder::new(pool.clone()));
    if let Err(err) = cache.reload_wait().await {
        tracing::error!(error = %err, "initial schema introspection failed");
        std::process::exit(1);
    }
    if let Err(err) = ayb_schema::watcher::sync_row_triggers(&pool, &cache).await {
        tracing::error!(error = %err, "failed to install row-change triggers");
        std::process::exit(1);
    }

    let health = health::HealthRegistry::new("ayb-server");
    let heartbeat = health
        .register("event_loop".to_string(), time::Duration::seconds(60))
        .await;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        loop {
            ticker.tick().await;
            heartbeat.report_healthy().await;
        }
    });

    // Liveness only answers "is the process wedged"; readiness answers "can
    // this instance actually serve traffic right now" — kept as its own
    // registry per the warning above against merging the two.
    let readiness = health::HealthRegistry::new("ayb-server-readiness");
    let schema_ready = readiness
        .register("schema_cache".to_string(), time::Duration::seconds(60))
        .await;
    tokio::spawn({
        let cache = cache.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(20));
            loop {
                ticker.tick().await;
                if cache.is_ready() {
                    schema_ready.report_healthy().await;
                }
            }
        }
    });
    let pool_ready = readiness
        .register("database_pool".to_string(), time::Duration::seconds(60))
        .await;
    tokio::spawn({
        let pool = pool.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(20));
            loop {
                ticker.tick().await;
                if sqlx::query("SELECT 1").execute(&pool).await.is_ok() {
                    pool_ready.report_healthy().await;
                }
            }
        }
    });

    tokio::spawn({
        let pool = pool.clone();
        let cache = cache.clone();
        let debounce = config.schema_reload_debounce.0;
        async move {
            if let Err(err) = ayb_schema::watcher::run(pool, cache, debounce).await {
                tracing::error!(error = %err, "schema watcher exited");
            }
        }
    });

    let (event_tx, _) = broadcast::channel::<Event>(EVENT_BUS_CAPACITY);
    tokio::spawn({
        let pool = pool.clone();
        let event_tx = event_tx.clone();
        async move {
            if let Err(err) = ayb_realtime::listener::run(pool, event_tx).await {
                tracing::error!(error = %err, "change notifier listener exited");
            }
        }
    });

    let auth_state = Arc::new(AuthState::new(
        pool.clone(),
        TokenIssuer::new(config.auth.jwt_secret.clone(), ADMIN_TOKEN_TTL),
        config.auth.enabled,
    ));
    let admin_auth_state = Arc::new(AdminAuthState {
        admin_password: config.auth.admin_password.clone(),
        issuer: Arc::new(TokenIssuer::new(config.auth.jwt_secret.clone(), ADMIN_TOKEN_TTL)),
    });

    let rate_limiter = RateLimiterState::new();
    tokio::spawn({
        let registry = rate_limiter.registry.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        }
    });

    let collections_state = Arc::new(ayb_collections::CollectionsState {
        pool: pool.clone(),
        cache: cache.clone(),
    });

    let hub_state = if config.realtime.enabled {
        Some(Arc::new(HubState::new(
            pool.clone(),
            cache.clone(),
            event_tx.clone(),
            Duration::from_secs(config.realtime.heartbeat_secs),
        )))
    } else {
        None
    };

    let webhooks_state = if config.webhooks.enabled {
        let (queue_tx, queue_rx) = tokio::sync::mpsc::channel::<Event>(config.webhooks.dispatch_queue_size);
        let state = Arc::new(WebhooksState::new(
            pool.clone(),
            queue_tx,
            config.webhooks.delivery_retention_days,
            config.webhooks.request_timeout.0,
        ));

        tokio::spawn({
            let mut event_rx = event_tx.subscribe();
            let state = state.clone();
            async move {
                loop {
                    match event_rx.recv().await {
                        Ok(event) => state.enqueue(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "webhook source queue lagged behind the event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        tokio::spawn(ayb_webhooks::dispatch::run(state.clone(), queue_rx));
        tokio::spawn(ayb_webhooks::pruner::run(
            state.clone(),
            Duration::from_secs(config.webhooks.prune_interval_secs),
        ));

        state
    } else {
        // Webhooks disabled: still need a state for the admin CRUD routes
        // to operate against (an operator can register webhooks ahead of
        // flipping the feature on), just with a queue nothing drains.
        let (queue_tx, _queue_rx) = tokio::sync::mpsc::channel::<Event>(1);
        Arc::new(WebhooksState::new(
            pool.clone(),
            queue_tx,
            config.webhooks.delivery_retention_days,
            config.webhooks.request_timeout.0,
        ))
    };

    let jobs_state = Arc::new(JobsState::new(pool.clone()));
    let mut worker_handles = Vec::new();
    if config.jobs.enabled {
        let handlers = HandlerRegistryBuilder::default().build();
        for i in 0..config.jobs.pool_size {
            let worker = JobWorker {
                id: format!("worker-{i}"),
                pool: pool.clone(),
                lease: ChronoDuration::seconds(config.jobs.lease_seconds),
                poll_interval: config.jobs.poll_interval.0,
                handlers: handlers.clone(),
                shutdown: jobs_state.shutdown.clone(),
                cancellations: jobs_state.cancellations.clone(),
            };
            worker_handles.push(tokio::spawn(worker.run()));
        }

        tokio::spawn(ayb_jobs::sweeper::run(
            Arc::new(pool.clone()),
            config.jobs.poll_interval.0,
        ));
        tokio::spawn(ayb_jobs::scheduler::run(
            Arc::new(pool.clone()),
            config.jobs.materializer_interval.0,
        ));
    }

    let app = router::build(router::AppRouterDeps {
        auth: auth_state,
        rate_limiter,
        admin_auth: admin_auth_state,
        collections: collections_state,
        webhooks: webhooks_state,
        jobs: jobs_state.clone(),
        hub: hub_state,
        health,
        readiness,
    });

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to bind http listener");
            std::process::exit(2);
        });

    tracing::info!(addr = %config.bind(), "ayb-server listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "http server exited with an error");
    }

    // Signal every running job handler and give them the configured grace
    // window to return on their own before the process exits out from under
    // them; anything still in flight is picked back up via lease expiry.
    jobs_state.shutdown.cancel();
    let grace = Duration::from_secs(config.jobs.shutdown_grace_seconds);
    if tokio::time::timeout(grace, futures::future::join_all(worker_handles))
        .await
        .is_err()
    {
        tracing::warn!("job workers did not finish within the shutdown grace window");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
