use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshqueue_core::{Error, Result, WorkItemReader, WorkItemRecord, WorkQueue};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Ingest outcome for `InboxStore::ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Duplicate,
}

/// Inbox ingest/claim/ack/abandon/fail/reap.
///
/// Ordered by `last_seen_at` for fairness. Status is the string
/// enum `Seen`/`Processing`/`Done`/`Dead`.
#[derive(Debug, Clone)]
pub struct InboxStore {
    pool: PgPool,
}

impl InboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert keyed on `message_id` (unique across the table regardless of
    /// `source`). Duplicates only bump `last_seen_at`.
    pub async fn ingest(
        &self,
        source: &str,
        message_id: &str,
        topic: &str,
        payload: Value,
        hash: &str,
    ) -> Result<(Uuid, IngestOutcome)> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO meshqueue.inbox
                (id, source, message_id, topic, payload, hash, status, first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'Seen', now(), now())
            ON CONFLICT (message_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(source)
        .bind(message_id)
        .bind(topic)
        .bind(&payload)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.try_get("id")?, IngestOutcome::Inserted));
        }

        let existing = sqlx::query(
            r#"
            UPDATE meshqueue.inbox
            SET last_seen_at = now()
            WHERE message_id = $1
            RETURNING id
            "#,
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing.try_get("id")?, IngestOutcome::Duplicate))
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<meshqueue_core::InboxMessage>> {
        let row = sqlx::query_as::<_, meshqueue_core::InboxMessage>(
            r#"SELECT * FROM meshqueue.inbox WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl WorkQueue for InboxStore {
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
                SELECT id FROM meshqueue.inbox
                WHERE status = 'Seen'
                  AND (locked_until IS NULL OR locked_until <= now())
                  AND (due_at IS NULL OR due_at <= now())
                ORDER BY last_seen_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE meshqueue.inbox AS i
            SET status = 'Processing', owner_token = $2, locked_until = $3, last_seen_at = now()
            FROM picked
            WHERE i.id = picked.id
            RETURNING i.id
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
            UPDATE meshqueue.inbox
            SET status = 'Done', owner_token = NULL, locked_until = NULL,
                processed_at = now(), last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 'Processing'
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
            UPDATE meshqueue.inbox
            SET status = 'Seen', owner_token = NULL, locked_until = NULL,
                attempts = attempts + 1,
                last_error = COALESCE($3, last_error),
                due_at = COALESCE($4, due_at),
                last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 'Processing'
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
            UPDATE meshqueue.inbox
            SET status = 'Dead', owner_token = NULL, locked_until = NULL,
                last_error = COALESCE($3, last_error), last_seen_at = now()
            WHERE id = ANY($1) AND owner_token = $2 AND status = 'Processing'
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
            UPDATE meshqueue.inbox
            SET status = 'Seen', owner_token = NULL, locked_until = NULL, last_seen_at = now()
            WHERE status = 'Processing' AND locked_until IS NOT NULL AND locked_until <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkItemReader for InboxStore {
    async fn load_for_handling(&self, id: Uuid) -> Result<Option<WorkItemRecord>> {
        let row = sqlx::query(
            r#"SELECT id, topic, payload, attempts FROM meshqueue.inbox WHERE id = $1"#,
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
