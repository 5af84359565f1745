use chrono::{DateTime, Utc};
use meshqueue_core::{FanoutCursor, Result};
use sqlx::PgPool;

/// Per-`(topic, work_key, shard_key)` progress record.
#[derive(Debug, Clone)]
pub struct FanoutCursorStore {
    pool: PgPool,
}

impl FanoutCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads (or implicitly creates, all-null) the cursor for one shard.
    pub async fn get_or_default(
        &self,
        topic: &str,
        work_key: &str,
        shard_key: &str,
    ) -> Result<FanoutCursor> {
        if let Some(existing) = sqlx::query_as::<_, FanoutCursor>(
            r#"
            SELECT * FROM meshqueue.fanout_cursor
            WHERE topic = $1 AND work_key = $2 AND shard_key = $3
            "#,
        )
        .bind(topic)
        .bind(work_key)
        .bind(shard_key)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(existing);
        }

        sqlx::query(
            r#"
            INSERT INTO meshqueue.fanout_cursor (topic, work_key, shard_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (topic, work_key, shard_key) DO NOTHING
            "#,
        )
        .bind(topic)
        .bind(work_key)
        .bind(shard_key)
        .execute(&self.pool)
        .await?;

        Ok(FanoutCursor {
            topic: topic.to_string(),
            work_key: work_key.to_string(),
            shard_key: shard_key.to_string(),
            last_completed_at: None,
            last_attempt_at: None,
            last_attempt_status: None,
            next_attempt_at: None,
        })
    }

    /// Records a dispatch attempt before (or in lieu of) writing the outbox
    /// message.
    pub async fn mark_attempt(
        &self,
        topic: &str,
        work_key: &str,
        shard_key: &str,
        attempted_at: DateTime<Utc>,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meshqueue.fanout_cursor (topic, work_key, shard_key, last_attempt_at, last_attempt_status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (topic, work_key, shard_key) DO UPDATE SET
                last_attempt_at = EXCLUDED.last_attempt_at,
                last_attempt_status = EXCLUDED.last_attempt_status
            "#,
        )
        .bind(topic)
        .bind(work_key)
        .bind(shard_key)
        .bind(attempted_at)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Called back by the shard handler once its downstream work acks.
    pub async fn mark_completed(
        &self,
        topic: &str,
        work_key: &str,
        shard_key: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meshqueue.fanout_cursor (topic, work_key, shard_key, last_completed_at, last_attempt_status)
            VALUES ($1, $2, $3, $4, 'completed')
            ON CONFLICT (topic, work_key, shard_key) DO UPDATE SET
                last_completed_at = EXCLUDED.last_completed_at,
                last_attempt_status = 'completed'
            "#,
        )
        .bind(topic)
        .bind(work_key)
        .bind(shard_key)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
