//! C11 — Job Runner persistence primitives.
//!
//! The claim algorithm is the exact four statements spec.md prescribes:
//! `BEGIN` / `SELECT ... FOR UPDATE SKIP LOCKED` / `UPDATE ... RETURNING` /
//! `COMMIT`, grounded on `hook_common::pgqueue::PgQueue::dequeue`'s own
//! CTE-plus-skip-locked shape. Backoff follows the same crate's
//! `RetryPolicy::time_until_next_retry`, generalized to the fixed
//! `min(30s * 2^n, 1h)` curve spec.md names explicitly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use crate::model::Job;

const BASE_BACKOFF_SECONDS: i64 = 30;
const MAX_BACKOFF_SECONDS: i64 = 3600;

pub fn backoff(attempts: i32) -> ChronoDuration {
    let exp = attempts.max(1).min(20) as u32;
    let seconds = BASE_BACKOFF_SECONDS.saturating_mul(1i64 << exp.min(62));
    ChronoDuration::seconds(seconds.min(MAX_BACKOFF_SECONDS))
}

/// Inserts a queued job. A conflicting `idempotency_key` is a no-op that
/// returns the row already on file rather than an error, so callers can
/// enqueue idempotently without a read-then-write race.
pub async fn enqueue(
    pool: &PgPool,
    job_type: &str,
    payload: &serde_json::Value,
    run_at: DateTime<Utc>,
    max_attempts: i32,
    idempotency_key: Option<&str>,
    schedule_id: Option<uuid::Uuid>,
) -> Result<Job, sqlx::Error> {
    let inserted = sqlx::query_as::<_, Job>(
        r#"INSERT INTO _ayb_jobs (job_type, payload, run_at, max_attempts, idempotency_key, schedule_id)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
           RETURNING id, job_type, payload, state, run_at, lease_until, worker_id, attempts,
                     max_attempts, last_error, last_run_at, idempotency_key, schedule_id,
                     created_at, updated_at, completed_at, canceled_at"#,
    )
    .bind(job_type)
    .bind(payload)
    .bind(run_at)
    .bind(max_attempts)
    .bind(idempotency_key)
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;

    if let Some(job) = inserted {
        return Ok(job);
    }

    let Some(key) = idempotency_key else {
        unreachable!("ON CONFLICT only triggers for a non-null idempotency_key");
    };
    sqlx::query_as::<_, Job>(
        r#"SELECT id, job_type, payload, state, run_at, lease_until, worker_id, attempts,
                  max_attempts, last_error, last_run_at, idempotency_key, schedule_id,
                  created_at, updated_at, completed_at, canceled_at
           FROM _ayb_jobs WHERE idempotency_key = $1"#,
    )
    .bind(key)
    .fetch_one(pool)
    .await
}

/// The four-statement claim, run as a single transaction so the
/// `SKIP LOCKED` select and the state transition are atomic with respect to
/// every other worker racing the same tick.
pub async fn claim(pool: &PgPool, worker_id: &str, lease: ChronoDuration) -> Result<Option<Job>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let picked: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM _ayb_jobs WHERE state = 'queued' AND run_at <= now()
         ORDER BY run_at LIMIT 1 FOR UPDATE SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some((id,)) = picked else {
        tx.rollback().await?;
        return Ok(None);
    };

    let job = sqlx::query_as::<_, Job>(
        r#"UPDATE _ayb_jobs
           SET state = 'running', worker_id = $1, lease_until = now() + $2::interval,
               attempts = attempts + 1, last_run_at = now(), updated_at = now()
           WHERE id = $3
           RETURNING id, job_type, payload, state, run_at, lease_until, worker_id, attempts,
                     max_attempts, last_error, last_run_at, idempotency_key, schedule_id,
                     created_at, updated_at, completed_at, canceled_at"#,
    )
    .bind(worker_id)
    .bind(format!("{} seconds", lease.num_seconds()))
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(job))
}

pub async fn complete(pool: &PgPool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE _ayb_jobs SET state = 'completed', completed_at = now(), lease_until = null,
         updated_at = now() WHERE id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requeues with exponential backoff if attempts remain, otherwise marks
/// the job terminally failed.
pub async fn fail(pool: &PgPool, job: &Job, error: &str) -> Result<(), sqlx::Error> {
    if job.attempts < job.max_attempts {
        let delay = backoff(job.attempts);
        sqlx::query(
            "UPDATE _ayb_jobs SET state = 'queued', run_at = now() + $1::interval,
             lease_until = null, last_error = $2, updated_at = now() WHERE id = $3",
        )
        .bind(format!("{} seconds", delay.num_seconds()))
        .bind(error)
        .bind(job.id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "UPDATE _ayb_jobs SET state = 'failed', last_error = $1, lease_until = null,
             updated_at = now() WHERE id = $2",
        )
        .bind(error)
        .bind(job.id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// `queued -> canceled` happens immediately; a job already `running` only
/// gets `canceled_at` set — the worker observes it as a cooperative signal
/// on its next check and must stop on its own.
pub async fn cancel(pool: &PgPool, job_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE _ayb_jobs SET state = 'canceled', canceled_at = now(), updated_at = now()
         WHERE id = $1 AND state = 'queued'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(true);
    }
    let result = sqlx::query(
        "UPDATE _ayb_jobs SET canceled_at = now(), updated_at = now()
         WHERE id = $1 AND state = 'running' AND canceled_at IS NULL",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get(pool: &PgPool, job_id: i64) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        r#"SELECT id, job_type, payload, state, run_at, lease_until, worker_id, attempts,
                  max_attempts, last_error, last_run_at, idempotency_key, schedule_id,
                  created_at, updated_at, completed_at, canceled_at
           FROM _ayb_jobs WHERE id = $1"#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

pub async fn list(pool: &PgPool, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        r#"SELECT id, job_type, payload, state, run_at, lease_until, worker_id, attempts,
                  max_attempts, last_error, last_run_at, idempotency_key, schedule_id,
                  created_at, updated_at, completed_at, canceled_at
           FROM _ayb_jobs ORDER BY id DESC LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Requeues jobs abandoned by a crashed worker: their lease expired while
/// still marked `running`.
pub async fn sweep_expired_leases(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE _ayb_jobs SET state = 'queued', lease_until = null, worker_id = null, updated_at = now()
         WHERE state = 'running' AND lease_until < now()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff(1), ChronoDuration::seconds(60));
        assert_eq!(backoff(2), ChronoDuration::seconds(120));
        assert_eq!(backoff(10), ChronoDuration::seconds(MAX_BACKOFF_SECONDS));
    }
}
