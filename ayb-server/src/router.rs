//! Assembles every component's handlers into one axum [`Router`], the way
//! `hook_api::handlers::add_routes` wires a single queue resource's routes
//! onto a caller-supplied `Router` — generalized here to several
//! independently-stateful feature routers merged together, since this
//! binary owns many more concerns than the teacher's single-purpose ones.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::admin_auth::{self, AdminAuthState};

const OPENAPI_YAML: &str = include_str!("../static/openapi.yaml");

pub struct AppRouterDeps {
    pub auth: Arc<ayb_auth::AuthState>,
    pub rate_limiter: ayb_ratelimit::RateLimiterState,
    pub admin_auth: Arc<AdminAuthState>,
    pub collections: Arc<ayb_collections::CollectionsState>,
    pub webhooks: Arc<ayb_webhooks::WebhooksState>,
    pub jobs: Arc<ayb_jobs::JobsState>,
    pub hub: Option<Arc<ayb_realtime::HubState>>,
    pub health: health::HealthRegistry,
    pub readiness: health::HealthRegistry,
}

pub fn build(deps: AppRouterDeps) -> Router {
    let unauthenticated = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/openapi.yaml", get(openapi))
        .route(
            "/_liveness",
            get({
                let registry = deps.health.clone();
                move || {
                    let registry = registry.clone();
                    async move { registry.get_status() }
                }
            }),
        )
        .route(
            "/_readiness",
            get({
                let registry = deps.readiness.clone();
                move || {
                    let registry = registry.clone();
                    async move { registry.get_status() }
                }
            }),
        )
        .merge(metrics_http::setup_metrics_router())
        .route(
            "/api/auth/admin-login",
            post(admin_auth::admin_login).with_state(deps.admin_auth.clone()),
        );

    let collections = collections_router(deps.collections.clone());
    let webhooks = webhooks_router(deps.webhooks.clone());
    let jobs = jobs_router(deps.jobs.clone());

    let mut authenticated = collections.merge(webhooks).merge(jobs);

    if let Some(hub) = deps.hub {
        authenticated = authenticated.merge(
            Router::new()
                .route("/api/realtime", get(ayb_realtime::stream))
                .with_state(hub),
        );
    }

    let authenticated = authenticated
        .layer(axum::middleware::from_fn_with_state(
            deps.rate_limiter,
            ayb_ratelimit::enforce,
        ))
        .layer(axum::middleware::from_fn_with_state(
            deps.auth,
            ayb_auth::middleware::resolve,
        ));

    unauthenticated
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn openapi() -> ([(&'static str, &'static str); 1], &'static str) {
    ([("content-type", "text/yaml")], OPENAPI_YAML)
}

fn collections_router(state: Arc<ayb_collections::CollectionsState>) -> Router {
    Router::new()
        .route(
            "/api/collections/:table",
            get(ayb_collections::handlers::list_records).post(ayb_collections::handlers::insert_record),
        )
        .route(
            "/api/collections/:table/:id",
            get(ayb_collections::handlers::get_record)
                .patch(ayb_collections::handlers::update_record)
                .delete(ayb_collections::handlers::delete_record),
        )
        .route(
            "/api/collections/:table/batch",
            post(ayb_collections::handlers::batch_records),
        )
        .route("/api/rpc/:function", post(ayb_collections::rpc::call_function))
        .with_state(state)
}

fn webhooks_router(state: Arc<ayb_webhooks::WebhooksState>) -> Router {
    Router::new()
        .route(
            "/api/webhooks",
            get(ayb_webhooks::handlers::list_webhooks).post(ayb_webhooks::handlers::create_webhook),
        )
        .route(
            "/api/webhooks/:id",
            get(ayb_webhooks::handlers::get_webhook)
                .patch(ayb_webhooks::handlers::update_webhook)
                .delete(ayb_webhooks::handlers::delete_webhook),
        )
        .route("/api/webhooks/:id/test", post(ayb_webhooks::handlers::test_webhook))
        .route(
            "/api/webhooks/:id/deliveries",
            get(ayb_webhooks::handlers::list_deliveries),
        )
        .route(
            "/api/webhooks/:id/deliveries/:delivery_id",
            get(ayb_webhooks::handlers::get_delivery),
        )
        .with_state(state)
}

fn jobs_router(state: Arc<ayb_jobs::JobsState>) -> Router {
    Router::new()
        .route(
            "/api/jobs",
            get(ayb_jobs::handlers::list_jobs).post(ayb_jobs::handlers::enqueue_job),
        )
        .route("/api/jobs/:id", get(ayb_jobs::handlers::get_job))
        .route("/api/jobs/:id/cancel", post(ayb_jobs::handlers::cancel_job))
        .route(
            "/api/schedules",
            get(ayb_jobs::handlers::list_schedules).post(ayb_jobs::handlers::create_schedule),
        )
        .route("/api/schedules/:id", delete(ayb_jobs::handlers::delete_schedule))
        .with_state(state)
}

