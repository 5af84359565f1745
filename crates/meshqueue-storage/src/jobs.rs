use chrono::{DateTime, Utc};
use meshqueue_core::{Job, Result};
use serde_json::Value;
use sqlx::PgPool;

/// Cron job definitions. The Scheduler in
/// `meshqueue-engine` is responsible for computing `next_run_at` from the
/// cron expression; this store just persists what it's told.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_or_update(
        &self,
        name: &str,
        topic: &str,
        cron_expression: &str,
        payload: Value,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meshqueue.jobs (name, topic, cron_expression, payload, enabled, next_run_at)
            VALUES ($1, $2, $3, $4, true, $5)
            ON CONFLICT (name) DO UPDATE SET
                topic = EXCLUDED.topic,
                cron_expression = EXCLUDED.cron_expression,
                payload = EXCLUDED.payload,
                enabled = true,
                next_run_at = EXCLUDED.next_run_at
            "#,
        )
        .bind(name)
        .bind(topic)
        .bind(cron_expression)
        .bind(payload)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM meshqueue.jobs WHERE name = $1"#)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(r#"SELECT * FROM meshqueue.jobs WHERE name = $1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Enabled jobs whose `next_run_at` is due, for the materialization loop.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM meshqueue.jobs
            WHERE enabled AND next_run_at IS NOT NULL AND next_run_at <= $1
            ORDER BY next_run_at, name
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Advance `last_run_at`/`next_run_at` for one job inside the
    /// materializer's per-job transaction.
    pub async fn advance(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        name: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meshqueue.jobs
            SET last_run_at = $2, next_run_at = $3
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Minimum `next_run_at` among enabled jobs, used by
    /// `Scheduler::get_next_event_time`.
    pub async fn min_next_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"SELECT MIN(next_run_at) FROM meshqueue.jobs WHERE enabled AND next_run_at IS NOT NULL"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>> {
        Ok(self.pool.begin().await?)
    }
}
