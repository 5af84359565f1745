use meshqueue_core::{FanoutPolicy, Result};
use sqlx::PgPool;

/// `(topic, work_key) -> {every_seconds, jitter_seconds}` cadence policy.
#[derive(Debug, Clone)]
pub struct FanoutPolicyStore {
    pool: PgPool,
}

impl FanoutPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn set_cadence(
        &self,
        topic: &str,
        work_key: &str,
        every_seconds: i64,
        jitter_seconds: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meshqueue.fanout_policy (topic, work_key, every_seconds, jitter_seconds)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (topic, work_key) DO UPDATE SET
                every_seconds = EXCLUDED.every_seconds,
                jitter_seconds = EXCLUDED.jitter_seconds
            "#,
        )
        .bind(topic)
        .bind(work_key)
        .bind(every_seconds)
        .bind(jitter_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cadence(&self, topic: &str, work_key: &str) -> Result<Option<FanoutPolicy>> {
        let policy = sqlx::query_as::<_, FanoutPolicy>(
            r#"SELECT * FROM meshqueue.fanout_policy WHERE topic = $1 AND work_key = $2"#,
        )
        .bind(topic)
        .bind(work_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(policy)
    }
}
