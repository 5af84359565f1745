use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshqueue_core::{Error, Result, FANOUT_NAMESPACE};
use meshqueue_storage::{FanoutCursorStore, FanoutPolicyStore, OutboxStore};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Enumerates the candidate shards for one `(topic, work_key)`. Pluggable:
/// the coordinator never touches a shard this doesn't list.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn shards(&self, topic: &str, work_key: &str) -> Result<Vec<String>>;
}

/// A `Planner` backed by a fixed, in-memory shard list. Useful for small or
/// statically-sharded topics; larger deployments supply their own `Planner`.
pub struct StaticPlanner {
    shards: Vec<String>,
}

impl StaticPlanner {
    pub fn new(shards: Vec<String>) -> Self {
        Self { shards }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn shards(&self, _topic: &str, _work_key: &str) -> Result<Vec<String>> {
        Ok(self.shards.clone())
    }
}

/// Fan-out lifecycle for one `(topic, work_key)`. The caller is expected to
/// hold the `fanout:{topic}:{work_key}` lease for the duration of `run`.
pub struct FanoutCoordinator {
    planner: Arc<dyn Planner>,
    policy: Arc<FanoutPolicyStore>,
    cursor: Arc<FanoutCursorStore>,
    outbox: Arc<OutboxStore>,
}

impl FanoutCoordinator {
    pub fn new(
        planner: Arc<dyn Planner>,
        policy: Arc<FanoutPolicyStore>,
        cursor: Arc<FanoutCursorStore>,
        outbox: Arc<OutboxStore>,
    ) -> Self {
        Self {
            planner,
            policy,
            cursor,
            outbox,
        }
    }

    /// Reads the configured cadence for `(topic, work_key)`, if any.
    pub async fn get_cadence(
        &self,
        topic: &str,
        work_key: &str,
    ) -> Result<Option<meshqueue_core::FanoutPolicy>> {
        self.policy.get_cadence(topic, work_key).await
    }

    /// Sets (or updates) the dispatch cadence for `(topic, work_key)`.
    pub async fn set_cadence(
        &self,
        topic: &str,
        work_key: &str,
        every_seconds: i64,
        jitter_seconds: i64,
    ) -> Result<()> {
        self.policy
            .set_cadence(topic, work_key, every_seconds, jitter_seconds)
            .await
    }

    /// Called back by the shard handler once its downstream work completes,
    /// closing the loop `run` started when it dispatched that shard.
    pub async fn mark_completed(
        &self,
        topic: &str,
        work_key: &str,
        shard_key: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.cursor.mark_completed(topic, work_key, shard_key, at).await
    }

    /// Dispatches work to every due shard for `(topic, work_key)` and returns
    /// the number dispatched. Returns 0 (not an error) when the cadence
    /// policy is unset, matching "no cadence configured" as a quiet no-op.
    pub async fn run(&self, topic: &str, work_key: &str, shard_payload_topic: &str) -> Result<u64> {
        let Some(policy) = self.policy.get_cadence(topic, work_key).await? else {
            return Ok(0);
        };

        let shards = self.planner.shards(topic, work_key).await?;
        let now = Utc::now();
        let mut dispatched = 0u64;

        for shard_key in shards {
            let cursor = self.cursor.get_or_default(topic, work_key, &shard_key).await?;

            if !is_due(&cursor.last_completed_at, policy.every_seconds, policy.jitter_seconds, &shard_key, now) {
                continue;
            }

            self.cursor
                .mark_attempt(topic, work_key, &shard_key, now, "pending")
                .await?;

            match self
                .dispatch_shard(topic, work_key, &shard_key, shard_payload_topic, now, policy.every_seconds)
                .await
            {
                Ok(()) => {
                    self.cursor
                        .mark_attempt(topic, work_key, &shard_key, now, "dispatched")
                        .await?;
                    dispatched += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        event = "meshqueue.fanout.dispatch.error",
                        topic,
                        work_key,
                        shard_key,
                        error = %err,
                        "shard dispatch failed"
                    );
                    self.cursor
                        .mark_attempt(topic, work_key, &shard_key, now, "failed")
                        .await?;
                }
            }
        }

        Ok(dispatched)
    }

    async fn dispatch_shard(
        &self,
        topic: &str,
        work_key: &str,
        shard_key: &str,
        shard_payload_topic: &str,
        now: DateTime<Utc>,
        every_seconds: i64,
    ) -> Result<()> {
        let bucket_time = bucket(now, every_seconds);
        let message_id = deterministic_message_id(topic, work_key, shard_key, bucket_time);
        let payload: Value = serde_json::json!({
            "topic": topic,
            "work_key": work_key,
            "shard_key": shard_key,
            "bucket_time": bucket_time,
        });

        let mut tx = self.outbox.begin().await?;
        self.outbox
            .enqueue(&mut tx, message_id, shard_payload_topic, payload, None)
            .await?;
        tx.commit().await.map_err(Error::from)?;
        Ok(())
    }
}

fn is_due(
    last_completed_at: &Option<DateTime<Utc>>,
    every_seconds: i64,
    jitter_seconds: i64,
    shard_key: &str,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_completed_at else {
        return true;
    };

    let jitter = if jitter_seconds > 0 {
        shard_jitter_seed(shard_key) % (jitter_seconds as u64 + 1)
    } else {
        0
    };

    let due_after = *last + chrono::Duration::seconds(every_seconds + jitter as i64);
    now >= due_after
}

/// Deterministic per-shard jitter seed so a given shard always jitters the
/// same way within a run, spreading load without needing shared state.
fn shard_jitter_seed(shard_key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    shard_key.hash(&mut hasher);
    hasher.finish()
}

fn bucket(now: DateTime<Utc>, every_seconds: i64) -> i64 {
    if every_seconds <= 0 {
        return now.timestamp();
    }
    (now.timestamp() / every_seconds) * every_seconds
}

/// `Uuid::new_v5(&FANOUT_NAMESPACE, "{topic}:{work_key}:{shard_key}:{bucket_time}")`,
/// the same deterministic-id idiom used in
/// `dispatcher::outbox_id_for_buffer_publish`.
fn deterministic_message_id(topic: &str, work_key: &str, shard_key: &str, bucket_time: i64) -> Uuid {
    let name = format!("{topic}:{work_key}:{shard_key}:{bucket_time}");
    Uuid::new_v5(&FANOUT_NAMESPACE, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_when_never_completed() {
        assert!(is_due(&None, 60, 0, "shard-1", Utc::now()));
    }

    #[test]
    fn not_due_within_cadence_window() {
        let now = Utc::now();
        assert!(!is_due(&Some(now), 3600, 0, "shard-1", now));
    }

    #[test]
    fn same_inputs_yield_same_message_id() {
        let a = deterministic_message_id("t", "k", "s", 1000);
        let b = deterministic_message_id("t", "k", "s", 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn different_bucket_yields_different_message_id() {
        let a = deterministic_message_id("t", "k", "s", 1000);
        let b = deterministic_message_id("t", "k", "s", 2000);
        assert_ne!(a, b);
    }
}
