use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// What the dispatcher loop needs to invoke a handler for one claimed id,
/// independent of the row's domain-specific columns.
#[derive(Debug, Clone)]
pub struct WorkItemRecord {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub attempts: i32,
}

/// Loads the handler-relevant projection of a claimed row. Each domain store
/// in `meshqueue-storage` implements this alongside `WorkQueue` so the
/// generic dispatcher loop never needs to know the table's full shape.
#[async_trait]
pub trait WorkItemReader: Send + Sync {
    async fn load_for_handling(&self, id: Uuid) -> Result<Option<WorkItemRecord>>;
}

/// Generic claim/ack/abandon/fail/reap contract shared by outbox, inbox,
/// timers, and job-runs. One implementation per domain
/// table lives in `meshqueue-storage`; the dispatcher loop in
/// `meshqueue-engine` is written once against `dyn WorkQueue`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Atomically claim up to `batch_size` due, unlocked rows and return their
    /// ids. Never blocks on rows held by another claimer.
    async fn claim(
        &self,
        owner_token: Uuid,
        lease_seconds: i64,
        batch_size: i64,
    ) -> Result<Vec<Uuid>>;

    /// Transition to Done for rows still owned by `owner_token`. Ids whose
    /// ownership has moved on are silently ignored.
    async fn ack(&self, owner_token: Uuid, ids: &[Uuid]) -> Result<()>;

    /// Return rows to Ready, clear ownership, bump `attempts`, and optionally
    /// record `last_error`/`due_at`.
    async fn abandon(
        &self,
        owner_token: Uuid,
        ids: &[Uuid],
        last_error: Option<&str>,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Transition to Dead, clearing ownership and persisting `reason`.
    async fn fail(&self, owner_token: Uuid, ids: &[Uuid], reason: Option<&str>) -> Result<()>;

    /// Return every InProgress row whose lease has expired back to Ready,
    /// preserving `attempts`. Returns the count reaped.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
