use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Namespace for `Uuid::new_v5`-derived deterministic outbox message ids, the
/// same idempotent-id idiom as `dispatcher::OUTBOX_NAMESPACE`.
pub const FANOUT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x3a, 0x9e, 0x21, 0xd4, 0x4c, 0x4f, 0x0e, 0x9a, 0x7f, 0x2c, 0x5e, 0x8b, 0x11, 0x3d, 0x44,
]);

/// Numeric status encoding used by outbox, timers, and job-runs.
///
/// Values are part of the external contract — migrations read them, so the
/// discriminants must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum NumericStatus {
    Ready = 0,
    InProgress = 1,
    Done = 2,
    Dead = 3,
}

impl NumericStatus {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Ready),
            1 => Some(Self::InProgress),
            2 => Some(Self::Done),
            3 => Some(Self::Dead),
            _ => None,
        }
    }
}

/// String status encoding used by inbox rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboxStatus {
    Seen,
    Processing,
    Done,
    Dead,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seen => "Seen",
            Self::Processing => "Processing",
            Self::Done => "Done",
            Self::Dead => "Dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Seen" => Some(Self::Seen),
            "Processing" => Some(Self::Processing),
            "Done" => Some(Self::Done),
            "Dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A claimed batch: ids plus the owner token/lease deadline the claim was made
/// under, handed to the engine so it can fence its ack/abandon/fail calls.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub ids: Vec<Uuid>,
    pub owner_token: Uuid,
    pub locked_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub message_id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub correlation_id: Option<Uuid>,
    pub status: i16,
    pub owner_token: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboxMessage {
    pub id: Uuid,
    pub source: String,
    pub message_id: String,
    pub topic: String,
    pub payload: Value,
    pub hash: String,
    pub status: String,
    pub owner_token: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Timer {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub status: i16,
    pub owner_token: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub due_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub name: String,
    pub topic: String,
    pub cron_expression: String,
    pub payload: Value,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub topic: String,
    pub payload: Value,
    pub status: i16,
    pub owner_token: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lease {
    pub resource_name: String,
    pub owner_token: Option<Uuid>,
    pub lease_until: DateTime<Utc>,
    pub fencing_token: i64,
    pub context_json: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRow {
    pub key: String,
    pub status: String,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<Uuid>,
    pub failure_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FanoutPolicy {
    pub topic: String,
    pub work_key: String,
    pub every_seconds: i64,
    pub jitter_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FanoutCursor {
    pub topic: String,
    pub work_key: String,
    pub shard_key: String,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_status: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl JoinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxJoin {
    pub join_id: Uuid,
    pub expected_steps: i32,
    pub completed_steps: i32,
    pub failed_steps: i32,
    pub status: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxJoinMember {
    pub join_id: Uuid,
    pub outbox_message_id: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}
