use meshqueue_core::{Error, Result};
use meshqueue_storage::{OutboxJoinStore, OutboxStore};
use std::sync::Arc;
use uuid::Uuid;

/// Wires the outbox-join counters into the ordinary outbox ack/fail path,
/// for outbox messages that were `attach`ed to a join. Business handlers
/// call `ack_member`/`fail_member` instead of the bare `WorkQueue` methods
/// when a message may be part of a join.
pub struct OutboxJoinCoordinator {
    outbox: Arc<OutboxStore>,
    joins: Arc<OutboxJoinStore>,
}

impl OutboxJoinCoordinator {
    pub fn new(outbox: Arc<OutboxStore>, joins: Arc<OutboxJoinStore>) -> Self {
        Self { outbox, joins }
    }

    pub async fn create_join(&self, expected_steps: i32, metadata: serde_json::Value) -> Result<Uuid> {
        self.joins.create_join(expected_steps, metadata).await
    }

    pub async fn attach(&self, join_id: Uuid, outbox_message_id: Uuid) -> Result<()> {
        self.joins.attach(join_id, outbox_message_id).await
    }

    /// Acks the outbox message via `WorkQueue::ack`, then — if it carries a
    /// `join_id` — reports the completion to the join.
    pub async fn ack_member(
        &self,
        owner_token: Uuid,
        outbox_message_id: Uuid,
        join_id: Option<Uuid>,
    ) -> Result<()> {
        use meshqueue_core::WorkQueue;
        self.outbox.ack(owner_token, &[outbox_message_id]).await?;
        if let Some(join_id) = join_id {
            self.joins.on_member_completed(join_id, outbox_message_id).await?;
        }
        Ok(())
    }

    /// Fails the outbox message via `WorkQueue::fail`, then — if it carries a
    /// `join_id` — reports the failure to the join.
    pub async fn fail_member(
        &self,
        owner_token: Uuid,
        outbox_message_id: Uuid,
        join_id: Option<Uuid>,
        reason: Option<&str>,
    ) -> Result<()> {
        use meshqueue_core::WorkQueue;
        self.outbox.fail(owner_token, &[outbox_message_id], reason).await?;
        if let Some(join_id) = join_id {
            self.joins.on_member_failed(join_id, outbox_message_id).await?;
        }
        Ok(())
    }

    pub async fn status(&self, join_id: Uuid) -> Result<meshqueue_core::OutboxJoin> {
        self.joins
            .get(join_id)
            .await?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("join {join_id} not found")))
    }
}
