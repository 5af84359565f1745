use chrono::Duration;
use meshqueue_core::Result;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Outcome of `IdempotencyStore::try_begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryBeginOutcome {
    Started,
    AlreadyInProgress,
    AlreadyCompleted,
    AlreadyFailed,
}

/// At-most-once effect guard, keyed by a stable caller-supplied `key`.
/// A companion to the work-queue engine, not a replacement — used *inside*
/// a handler body.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    pool: PgPool,
}

impl IdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn try_begin(
        &self,
        key: &str,
        lock_duration: Duration,
        owner_token: Uuid,
    ) -> Result<TryBeginOutcome> {
        let locked_until = chrono::Utc::now() + lock_duration;

        let inserted = sqlx::query(
            r#"
            INSERT INTO meshqueue.idempotency (key, status, locked_until, locked_by, failure_count)
            VALUES ($1, 'in_progress', $2, $3, 0)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(locked_until)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(TryBeginOutcome::Started);
        }

        // The row exists. If its lock already expired (a prior `fail` or a
        // crashed holder), this is a legitimate retry: reclaim it instead of
        // reporting AlreadyInProgress forever.
        let reclaimed = sqlx::query(
            r#"
            UPDATE meshqueue.idempotency
            SET locked_until = $2, locked_by = $3
            WHERE key = $1 AND status = 'in_progress' AND locked_until <= now()
            "#,
        )
        .bind(key)
        .bind(locked_until)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;

        if reclaimed.rows_affected() == 1 {
            return Ok(TryBeginOutcome::Started);
        }

        let row = sqlx::query(r#"SELECT status FROM meshqueue.idempotency WHERE key = $1"#)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        let status: String = row.try_get("status")?;

        Ok(match status.as_str() {
            "in_progress" => TryBeginOutcome::AlreadyInProgress,
            "completed" => TryBeginOutcome::AlreadyCompleted,
            "failed" => TryBeginOutcome::AlreadyFailed,
            _ => TryBeginOutcome::AlreadyInProgress,
        })
    }

    /// InProgress → Completed iff owner matches. Returns `true` on success.
    pub async fn complete(&self, key: &str, owner_token: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE meshqueue.idempotency
            SET status = 'completed', locked_until = NULL, locked_by = NULL
            WHERE key = $1 AND locked_by = $2 AND status = 'in_progress'
            "#,
        )
        .bind(key)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Releases the claim (lock expires immediately) so a retry may begin
    /// later, and increments `failure_count`. Status stays `in_progress` by
    /// design: an expired lock is indistinguishable from "never begun" to
    /// `try_begin`, which is what allows the retry.
    pub async fn fail(&self, key: &str, owner_token: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE meshqueue.idempotency
            SET locked_until = now(), failure_count = failure_count + 1
            WHERE key = $1 AND locked_by = $2 AND status = 'in_progress'
            "#,
        )
        .bind(key)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
