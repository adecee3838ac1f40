//! Cron materializer: turns enabled schedules whose `next_run_at` has
//! arrived into queued jobs, one per fire slot, exactly once even across
//! restarts courtesy of the `schedule:<id>:<slot>` idempotency key.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use sqlx::PgPool;

use crate::model::Schedule;
use crate::queue;

pub async fn run(pool: Arc<PgPool>, interval: StdDuration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(err) = materialize_due(&pool).await {
            tracing::error!(error = %err, "job scheduler materializer tick failed");
        }
    }
}

async fn materialize_due(pool: &PgPool) -> Result<(), sqlx::Error> {
    let due = sqlx::query_as::<_, Schedule>(
        r#"SELECT id, name, job_type, payload, cron_expr, timezone, enabled, max_attempts,
                  next_run_at, last_run_at, created_at, updated_at
           FROM _ayb_job_schedules WHERE enabled = true AND next_run_at <= now()"#,
    )
    .fetch_all(pool)
    .await?;

    for schedule in due {
        if let Err(err) = materialize_one(pool, &schedule).await {
            tracing::error!(error = %err, schedule = %schedule.name, "failed to materialize schedule");
        }
    }
    Ok(())
}

async fn materialize_one(pool: &PgPool, schedule: &Schedule) -> Result<(), sqlx::Error> {
    let Some(slot) = schedule.next_run_at else {
        return Ok(());
    };
    let idempotency_key = format!(
        "schedule:{}:{}",
        schedule.id,
        slot.format("%Y%m%dT%H%M%SZ")
    );

    queue::enqueue(
        pool,
        &schedule.job_type,
        &schedule.payload,
        slot,
        schedule.max_attempts,
        Some(&idempotency_key),
        Some(schedule.id),
    )
    .await?;

    let next = next_fire_time(schedule, slot).unwrap_or(slot + chrono::Duration::minutes(1));

    sqlx::query(
        "UPDATE _ayb_job_schedules SET next_run_at = $1, last_run_at = $2, updated_at = now()
         WHERE id = $3",
    )
    .bind(next)
    .bind(slot)
    .bind(schedule.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Computes the next occurrence strictly after `after`, evaluated in the
/// schedule's own timezone so a "daily at 9am" schedule fires at local 9am
/// year-round regardless of daylight saving transitions.
pub fn next_fire_time(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz: Tz = schedule.timezone.parse().unwrap_or(chrono_tz::UTC);
    let cron = Cron::from_str(&schedule.cron_expr).ok()?;
    let after_local = after.with_timezone(&tz);
    let next_local = cron.find_next_occurrence(&after_local, false).ok()?;
    Some(next_local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn schedule(cron_expr: &str) -> Schedule {
        Schedule {
            id: Uuid::now_v7(),
            name: "nightly".to_string(),
            job_type: "noop".to_string(),
            payload: json!({}),
            cron_expr: cron_expr.to_string(),
            timezone: "UTC".to_string(),
            enabled: true,
            max_attempts: 5,
            next_run_at: None,
            last_run_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn next_fire_time_advances_past_after() {
        let schedule = schedule("0 * * * *");
        let after = Utc::now();
        let next = next_fire_time(&schedule, after).expect("valid cron expression");
        assert!(next > after);
    }

    #[test]
    fn invalid_cron_returns_none() {
        let schedule = schedule("not a cron expression");
        assert!(next_fire_time(&schedule, Utc::now()).is_none());
    }
}
