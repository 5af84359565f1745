use chrono::{DateTime, Utc};
use meshqueue_core::{Lease, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Fencing-token lease rows, one per resource name.
///
/// `acquire`/`renew` both follow the fencing check idiom used for task-lease
/// heartbeats: an `UPDATE ... WHERE <ownership predicate> RETURNING` whose
/// absence of a returned row means the caller lost the race.
///
/// The row for a resource is never deleted once created: `release` and
/// `cleanup_expired` only clear `owner_token`/`lease_until`, because the next
/// `acquire` reusing this resource name must see the prior `fencing_token`
/// and increment past it, not restart from 1.
#[derive(Debug, Clone)]
pub struct LeaseStore {
    pool: PgPool,
}

pub struct AcquireOutcome {
    pub fencing_token: i64,
    pub lease_until: DateTime<Utc>,
}

impl LeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns `Some` iff the row for `resource` is absent, expired, or
    /// already owned by `owner_token` (renewal-through-acquire). Increments
    /// `fencing_token` on every success, including the first-ever row for a
    /// resource, which starts at 1.
    pub async fn acquire(
        &self,
        resource: &str,
        duration: chrono::Duration,
        owner_token: Uuid,
        context: Value,
    ) -> Result<Option<AcquireOutcome>> {
        let now = Utc::now();
        let lease_until = now + duration;

        let row = sqlx::query(
            r#"
            INSERT INTO meshqueue.lease (resource_name, owner_token, lease_until, fencing_token, context_json)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (resource_name) DO UPDATE SET
                owner_token = EXCLUDED.owner_token,
                lease_until = EXCLUDED.lease_until,
                fencing_token = meshqueue.lease.fencing_token + 1,
                context_json = EXCLUDED.context_json
            WHERE meshqueue.lease.lease_until <= now()
               OR meshqueue.lease.owner_token = EXCLUDED.owner_token
            RETURNING fencing_token, lease_until
            "#,
        )
        .bind(resource)
        .bind(owner_token)
        .bind(lease_until)
        .bind(context)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AcquireOutcome {
            fencing_token: r.get("fencing_token"),
            lease_until: r.get("lease_until"),
        }))
    }

    /// Succeeds only if the row still matches `owner_token ∧ lease_until >
    /// now`; strictly increments `fencing_token` on success.
    pub async fn renew(
        &self,
        resource: &str,
        owner_token: Uuid,
        duration: chrono::Duration,
    ) -> Result<Option<AcquireOutcome>> {
        let lease_until = Utc::now() + duration;

        let row = sqlx::query(
            r#"
            UPDATE meshqueue.lease
            SET lease_until = $3, fencing_token = fencing_token + 1
            WHERE resource_name = $1 AND owner_token = $2 AND lease_until > now()
            RETURNING fencing_token, lease_until
            "#,
        )
        .bind(resource)
        .bind(owner_token)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AcquireOutcome {
            fencing_token: r.get("fencing_token"),
            lease_until: r.get("lease_until"),
        }))
    }

    /// Clears ownership if the row still matches `owner_token`, leaving the
    /// row (and its `fencing_token`) in place so a later `acquire` continues
    /// the count instead of restarting at 1. Idempotent.
    pub async fn release(&self, resource: &str, owner_token: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meshqueue.lease
            SET owner_token = NULL, lease_until = now()
            WHERE resource_name = $1 AND owner_token = $2
            "#,
        )
        .bind(resource)
        .bind(owner_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears ownership on any row past its `lease_until`, again without
    /// deleting it.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE meshqueue.lease
            SET owner_token = NULL
            WHERE lease_until <= now() AND owner_token IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, resource: &str) -> Result<Option<Lease>> {
        let lease = sqlx::query_as::<_, Lease>(
            r#"SELECT * FROM meshqueue.lease WHERE resource_name = $1"#,
        )
        .bind(resource)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }
}
