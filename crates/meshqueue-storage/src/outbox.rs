use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshqueue_core::{Error, Result, WorkItemReader, WorkItemRecord, WorkQueue};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Outbox enqueue/claim/ack/abandon/fail/reap.
///
/// Ordered by `created_at` for fairness. Status is numeric
/// (0=Ready, 1=InProgress, 2=Done, 3=Dead).
#[derive(Debug, Clone)]
pub struct OutboxStore {
    pool: PgPool,
}

impl OutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Begins a transaction for callers (e.g. the Fan-out Coordinator) that
    /// need to enqueue as their own unit of work rather than joining an
    /// existing business transaction.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Enqueue a message inside the caller's business transaction. A repeat
    /// call with an existing `message_id` is a no-op that returns the
    /// existing row's id, unless the payload/topic diverge, in which case it
    /// is an application bug surfaced as a `ConstraintViolation`.
    pub async fn enqueue(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        message_id: Uuid,
        topic: &str,
        payload: Value,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO meshqueue.outbox
                (id, message_id, topic, payload, correlation_id, status, created_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, 0, now(), now())
            ON CONFLICT (message_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(topic)
        .bind(&payload)
        .bind(correlation_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.try_get("id")?);
        }

        let existing = sqlx::query(
            r#"SELECT id, topic, payload FROM meshqueue.outbox WHERE message_id = $1"#,
        )
        .bind(message_id)
        .fetch_one(&mut **tx)
        .await?;

        let existing_id: Uuid = existing.try_get("id")?;
        let existing_topic: String = existing.try_get("topic")?;
        let existing_payload: Value = existing.try_get("payload")?;

        if existing_topic != topic || existing_payload != payload {
            return Err(Error::ConstraintViolation(format!(
                "outbox message_id={message_id} already exists with divergent topic/payload"
            )));
        }

        Ok(existing_id)
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<meshqueue_core::OutboxMessage>> {
        let row = sqlx::query_as::<_, meshqueue_core::OutboxMessage>(
            r#"SELECT * FROM meshqueue.outbox WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl WorkQueue for OutboxStore {
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
                SELECT id FROM meshqueue.outbox
                WHERE status = 0
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND (due_at IS NULL OR due_at <= now())
                ORDER BY created_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE meshqueue.outbox AS o
            SET status = 1, owner_token = $2, locked_until = $3, last_seen_at = now()
            FROM picked
            WHERE o.id = picked.id
            RETURNING o.id
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
            UPDATE meshqueue.outbox
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
            UPDATE meshqueue.outbox
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
            UPDATE meshqueue.outbox
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
            UPDATE meshqueue.outbox
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
impl WorkItemReader for OutboxStore {
    async fn load_for_handling(&self, id: Uuid) -> Result<Option<WorkItemRecord>> {
        let row = sqlx::query(
            r#"SELECT id, topic, payload, attempts FROM meshqueue.outbox WHERE id = $1"#,
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
