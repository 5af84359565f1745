use meshqueue_core::{JoinStatus, OutboxJoin, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Fan-in barrier across N outbox messages.
#[derive(Debug, Clone)]
pub struct OutboxJoinStore {
    pool: PgPool,
}

impl OutboxJoinStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_join(&self, expected_steps: i32, metadata: Value) -> Result<Uuid> {
        let join_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO meshqueue.outbox_join (join_id, expected_steps, completed_steps, failed_steps, status, metadata)
            VALUES ($1, $2, 0, 0, 'in_progress', $3)
            "#,
        )
        .bind(join_id)
        .bind(expected_steps)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(join_id)
    }

    pub async fn attach(&self, join_id: Uuid, outbox_message_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meshqueue.outbox_join_member (join_id, outbox_message_id)
            VALUES ($1, $2)
            ON CONFLICT (join_id, outbox_message_id) DO NOTHING
            "#,
        )
        .bind(join_id)
        .bind(outbox_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transactionally bumps `completed_steps` and derives the terminal
    /// status, but only if the member wasn't already completed or failed.
    pub async fn on_member_completed(&self, join_id: Uuid, outbox_message_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE meshqueue.outbox_join_member
            SET completed_at = now()
            WHERE join_id = $1 AND outbox_message_id = $2
              AND completed_at IS NULL AND failed_at IS NULL
            "#,
        )
        .bind(join_id)
        .bind(outbox_message_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 1 {
            self.advance(&mut tx, join_id, 1, 0).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Mirror of `on_member_completed` for the failure path.
    pub async fn on_member_failed(&self, join_id: Uuid, outbox_message_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE meshqueue.outbox_join_member
            SET failed_at = now()
            WHERE join_id = $1 AND outbox_message_id = $2
              AND completed_at IS NULL AND failed_at IS NULL
            "#,
        )
        .bind(join_id)
        .bind(outbox_message_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 1 {
            self.advance(&mut tx, join_id, 0, 1).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Bumps the counters and derives `status` iff the join row is still
    /// `in_progress` — once terminal (Succeeded/Failed), a join is frozen
    /// (documented open question, see DESIGN.md).
    async fn advance(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        join_id: Uuid,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<()> {
        let row = sqlx::query(
            r#"
            UPDATE meshqueue.outbox_join
            SET completed_steps = completed_steps + $2,
                failed_steps = failed_steps + $3
            WHERE join_id = $1 AND status = 'in_progress'
            RETURNING expected_steps, completed_steps, failed_steps
            "#,
        )
        .bind(join_id)
        .bind(completed_delta)
        .bind(failed_delta)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            return Ok(());
        };

        let expected_steps: i32 = row.try_get("expected_steps")?;
        let completed_steps: i32 = row.try_get("completed_steps")?;
        let failed_steps: i32 = row.try_get("failed_steps")?;

        if completed_steps + failed_steps >= expected_steps {
            let status = if failed_steps == 0 {
                JoinStatus::Succeeded
            } else {
                JoinStatus::Failed
            };
            sqlx::query(
                r#"UPDATE meshqueue.outbox_join SET status = $2 WHERE join_id = $1 AND status = 'in_progress'"#,
            )
            .bind(join_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    pub async fn get(&self, join_id: Uuid) -> Result<Option<OutboxJoin>> {
        let join = sqlx::query_as::<_, OutboxJoin>(
            r#"SELECT * FROM meshqueue.outbox_join WHERE join_id = $1"#,
        )
        .bind(join_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(join)
    }
}
