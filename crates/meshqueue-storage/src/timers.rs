use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshqueue_core::{Error, Result, WorkItemReader, WorkItemRecord, WorkQueue};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One-shot timer schedule/claim/ack/abandon/fail/reap.
///
/// Ordered by `due_at` for fairness.
#[derive(Debug, Clone)]
pub struct TimerStore {
    pool: PgPool,
}

impl TimerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn schedule_timer(
        &self,
        topic: &str,
        payload: Value,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO meshqueue.timers (id, topic, payload, due_at, status, created_at, last_seen_at)
            VALUES ($1, $2, $3, $4, 0, now(), now())
            "#,
        )
        .bind(id)
        .bind(topic)
        .bind(payload)
        .bind(due_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Ready → Dead iff not yet claimed. Returns `true` if cancelled.
    pub async fn cancel_timer(&self, timer_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE meshqueue.timers
            SET status = 3, last_seen_at = now()
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(timer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Minimum `due_at` among Ready timers, used by `Scheduler::get_next_event_time`.
    pub async fn min_ready_due_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"SELECT MIN(due_at) AS min_due_at FROM meshqueue.timers WHERE status = 0"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("min_due_at")?)
    }
}

#[async_trait]
impl WorkQueue for TimerStore {
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
                SELECT id FROM meshqueue.timers
                WHERE status = 0
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND due_at <= now()
                ORDER BY due_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE meshqueue.timers AS t
            SET status = 1, owner_token = $2, locked_until = $3, last_seen_at = now()
            FROM picked
            WHERE t.id = picked.id
            RETURNING t.id
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
            UPDATE meshqueue.timers
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
            UPDATE meshqueue.timers
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
            UPDATE meshqueue.timers
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
            UPDATE meshqueue.timers
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
impl WorkItemReader for TimerStore {
    async fn load_for_handling(&self, id: Uuid) -> Result<Option<WorkItemRecord>> {
        let row = sqlx::query(
            r#"SELECT id, topic, payload, attempts FROM meshqueue.timers WHERE id = $1"#,
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
