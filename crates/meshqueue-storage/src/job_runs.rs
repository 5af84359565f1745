use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshqueue_core::{Error, Result, WorkItemReader, WorkItemRecord, WorkQueue};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// JobRun claim/ack/abandon/fail/reap.
///
/// Ordered by `scheduled_at` for fairness. Materialization
/// (insertion) is owned by `Scheduler` in `meshqueue-engine`, which enforces
/// the `(job_name, scheduled_at)` duplicate-suppression via `ON CONFLICT DO
/// NOTHING` against the table's unique index.
#[derive(Debug, Clone)]
pub struct JobRunStore {
    pool: PgPool,
}

impl JobRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a JobRun for `(job_name, scheduled_at)` if one doesn't already
    /// exist. Returns `None` if a row for that key already existed.
    pub async fn insert_if_absent(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_name: &str,
        scheduled_at: DateTime<Utc>,
        topic: &str,
        payload: Value,
    ) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO meshqueue.job_runs
                (id, job_name, scheduled_at, topic, payload, status, created_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, 0, now(), now())
            ON CONFLICT (job_name, scheduled_at) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(job_name)
        .bind(scheduled_at)
        .bind(topic)
        .bind(payload)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(match row {
            Some(r) => Some(r.try_get("id")?),
            None => None,
        })
    }

    /// Materialized immediately by `Scheduler::trigger_job`.
    pub async fn trigger(
        &self,
        job_name: &str,
        topic: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let id = self
            .insert_if_absent(&mut tx, job_name, now, topic, payload)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Delete Ready job-runs for a deleted job; InProgress runs are left to
    /// complete.
    pub async fn delete_ready_for_job(&self, job_name: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM meshqueue.job_runs WHERE job_name = $1 AND status = 0"#,
        )
        .bind(job_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkQueue for JobRunStore {
    async fn claim(
        &self,
        owner_token: Uuid,
        lease_seconds: i64,
        batch_size: i64,
    ) -> Result<Vec<Uuid>> {
        if batch_size <= 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let locked_until = now + chrono::Duration::seconds(lease_seconds);

        let rows = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id FROM meshqueue.job_runs
                WHERE status = 0
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND (due_at IS NULL OR due_at <= now())
                ORDER BY scheduled_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE meshqueue.job_runs AS jr
            SET status = 1, owner_token = $2, locked_until = $3, last_seen_at = now()
            FROM picked
            WHERE jr.id = picked.id
            RETURNING jr.id
            "#,
        )
        .bind(batch_size)
        .bind(owner_token)
        .bind(locked_until)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get::<Uuid, _>("id").map_err(Error::from))
            .collect()
    }

    async fn ack(&self, owner_token: Uuid, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE meshqueue.job_runs
            SET status = 2, owner_token = NULL, locked_until = NULL,
                processed_at = now(), last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 1
            "#,
        )
        .bind(ids)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn abandon(
        &self,
        owner_token: Uuid,
        ids: &[Uuid],
        last_error: Option<&str>,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE meshqueue.job_runs
            SET status = 0, owner_token = NULL, locked_until = NULL,
                attempts = attempts + 1,
                last_error = COALESCE($3, last_error),
                due_at = COALESCE($4, due_at),
                last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 1
            "#,
        )
        .bind(ids)
        .bind(owner_token)
        .bind(last_error)
        .bind(due_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, owner_token: Uuid, ids: &[Uuid], reason: Option<&str>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE meshqueue.job_runs
            SET status = 3, owner_token = NULL, locked_until = NULL,
                last_error = COALESCE($3, last_error), last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 1
            "#,
        )
        .bind(ids)
        .bind(owner_token)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE meshqueue.job_runs
            SET status = 0, owner_token = NULL, locked_until = NULL, last_seen_at = now()
            WHERE status = 1 AND locked_until IS NOT NULL AND locked_until <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkItemReader for JobRunStore {
    async fn load_for_handling(&self, id: Uuid) -> Result<Option<WorkItemRecord>> {
        let row = sqlx::query(
            r#"SELECT id, topic, payload, attempts FROM meshqueue.job_runs WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(WorkItemRecord {
                id: r.try_get("id")?,
                topic: r.try_get("topic")?,
                payload: r.try_get("payload")?,
                attempts: r.try_get("attempts")?,
            })
        })
        .transpose()
    }
}
