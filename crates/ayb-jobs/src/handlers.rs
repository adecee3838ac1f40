use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Extension;
use axum::Json;
use ayb_auth::{Principal, Role};
use ayb_error::{ApiError, ApiResult};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::model::{EnqueueRequest, Job, Schedule, ScheduleInput};
use crate::queue;
use crate::scheduler::next_fire_time;
use crate::state::JobsState;

fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.anonymous {
        return Err(ApiError::Unauthorized);
    }
    match principal.role {
        Role::Admin => Ok(()),
        Role::User => Err(ApiError::ForbiddenScope),
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub canceled: bool,
}

pub async fn enqueue_job(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<Json<Job>> {
    require_admin(&principal)?;
    let run_at = Utc::now() + chrono::Duration::seconds(request.delay_seconds.unwrap_or(0));
    let job = queue::enqueue(
        &state.pool,
        &request.job_type,
        &request.payload,
        run_at,
        request.max_attempts.unwrap_or(5),
        request.idempotency_key.as_deref(),
        None,
    )
    .await
    .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(job))
}

pub async fn list_jobs(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<Json<Vec<Job>>> {
    require_admin(&principal)?;
    let jobs = queue::list(&state.pool, 200)
        .await
        .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Job>> {
    require_admin(&principal)?;
    let job = queue::get(&state.pool, id)
        .await
        .map_err(ayb_error::classify_sqlx_error)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(job))
}

pub async fn cancel_job(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CancelResult>> {
    require_admin(&principal)?;
    let canceled = queue::cancel(&state.pool, id)
        .await
        .map_err(ayb_error::classify_sqlx_error)?;
    // Reaches a handler that's actually running; a no-op if the job was
    // still queued (already handled by the state transition above) or
    // finished before this request landed.
    state.cancellations.cancel(id);
    Ok(Json(CancelResult { canceled }))
}

pub async fn list_schedules(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<Json<Vec<Schedule>>> {
    require_admin(&principal)?;
    let schedules = sqlx::query_as::<_, Schedule>(
        r#"SELECT id, name, job_type, payload, cron_expr, timezone, enabled, max_attempts,
                  next_run_at, last_run_at, created_at, updated_at
           FROM _ayb_job_schedules ORDER BY name"#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(schedules))
}

pub async fn create_schedule(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(input): Json<ScheduleInput>,
) -> ApiResult<Json<Schedule>> {
    require_admin(&principal)?;

    let mut schedule = sqlx::query_as::<_, Schedule>(
        r#"INSERT INTO _ayb_job_schedules (name, job_type, payload, cron_expr, timezone, enabled, max_attempts)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id, name, job_type, payload, cron_expr, timezone, enabled, max_attempts,
                     next_run_at, last_run_at, created_at, updated_at"#,
    )
    .bind(&input.name)
    .bind(&input.job_type)
    .bind(&input.payload)
    .bind(&input.cron_expr)
    .bind(&input.timezone)
    .bind(input.enabled)
    .bind(input.max_attempts)
    .fetch_one(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;

    let first_fire = next_fire_time(&schedule, Utc::now())
        .ok_or_else(|| ApiError::Validation("invalid cron expression".to_string()))?;
    sqlx::query("UPDATE _ayb_job_schedules SET next_run_at = $1 WHERE id = $2")
        .bind(first_fire)
        .bind(schedule.id)
        .execute(&state.pool)
        .await
        .map_err(ayb_error::classify_sqlx_error)?;
    schedule.next_run_at = Some(first_fire);

    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<Arc<JobsState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    require_admin(&principal)?;
    let result = sqlx::query("DELETE FROM _ayb_job_schedules WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(ayb_error::classify_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
