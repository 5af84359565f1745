use crate::registry::HandlerRegistry;
use chrono::Utc;
use meshqueue_core::{
    BackoffPolicy, CancellationSignal, HandlerContext, HandlerResult, Result, WorkItemReader,
    WorkQueue,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Tunables for one dispatcher loop instance.
#[derive(Debug, Clone)]
pub struct DispatcherLoopConfig {
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub lease_seconds: i64,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_jitter: Duration::from_millis(200),
            lease_seconds: 30,
            batch_size: 10,
            max_attempts: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Drives claim → load → handle → ack/abandon/fail for one table, mirroring
/// the `tokio::select!` shape of `harness::worker::run`. Runs until
/// `shutdown_rx` reports `true`.
pub async fn run_loop<Q>(
    queue: Arc<Q>,
    registry: Arc<HandlerRegistry>,
    cfg: DispatcherLoopConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    Q: WorkQueue + WorkItemReader + 'static,
{
    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let owner_token = Uuid::new_v4();
        let claimed = queue
            .claim(owner_token, cfg.lease_seconds, cfg.batch_size)
            .await;

        let ids = match claimed {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(event = "meshqueue.dispatcher.claim.error", error = %err, "claim failed");
                let sleep = jittered(cfg.poll_interval, cfg.poll_jitter);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            }
        };

        if ids.is_empty() {
            let sleep = jittered(cfg.poll_interval, cfg.poll_jitter);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        }

        if let Err(err) = process_batch(
            queue.as_ref(),
            registry.as_ref(),
            owner_token,
            &ids,
            &cfg,
            shutdown_rx.clone(),
        )
        .await
        {
            tracing::warn!(event = "meshqueue.dispatcher.batch.error", error = %err, "batch processing failed");
        }
    }
}

async fn process_batch<Q>(
    queue: &Q,
    registry: &HandlerRegistry,
    owner_token: Uuid,
    ids: &[Uuid],
    cfg: &DispatcherLoopConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    Q: WorkQueue + WorkItemReader,
{
    let mut ok_ids = Vec::new();
    let mut abandon_ids = Vec::new();
    let mut fail_ids = Vec::new();
    let mut max_abandon_attempts = 0i32;
    let mut last_abandon_error: Option<String> = None;
    let mut last_fail_reason: Option<String> = None;

    for &id in ids {
        let Some(item) = queue.load_for_handling(id).await? else {
            // Row vanished between claim and load; leave it to the reaper.
            continue;
        };

        let Some(handler) = registry.get(&item.topic) else {
            tracing::warn!(
                event = "meshqueue.dispatcher.no_handler",
                topic = %item.topic,
                id = %id,
                "no handler registered for topic"
            );
            abandon_ids.push(id);
            max_abandon_attempts = max_abandon_attempts.max(item.attempts + 1);
            last_abandon_error = Some(format!("no handler registered for topic {}", item.topic));
            continue;
        };

        let ctx = HandlerContext {
            owner_token,
            attempts: item.attempts,
            cancellation: CancellationSignal::new(shutdown_rx.clone()),
        };

        match handler.handle(item.payload, &ctx).await {
            HandlerResult::Ok => ok_ids.push(id),
            HandlerResult::PermanentError(reason) => {
                fail_ids.push(id);
                last_fail_reason = Some(reason);
            }
            HandlerResult::TransientError(reason) => {
                if item.attempts + 1 >= cfg.max_attempts {
                    fail_ids.push(id);
                    last_fail_reason = Some(reason);
                } else {
                    abandon_ids.push(id);
                    max_abandon_attempts = max_abandon_attempts.max(item.attempts + 1);
                    last_abandon_error = Some(reason);
                }
            }
        }
    }

    if !ok_ids.is_empty() {
        queue.ack(owner_token, &ok_ids).await?;
    }
    if !abandon_ids.is_empty() {
        let due_at = next_due_at(max_abandon_attempts, &cfg.backoff);
        queue
            .abandon(
                owner_token,
                &abandon_ids,
                last_abandon_error.as_deref(),
                Some(due_at),
            )
            .await?;
    }
    if !fail_ids.is_empty() {
        queue
            .fail(owner_token, &fail_ids, last_fail_reason.as_deref())
            .await?;
    }

    Ok(())
}

fn next_due_at(attempts: i32, backoff: &BackoffPolicy) -> chrono::DateTime<Utc> {
    let delay = backoff.delay_for_attempt(attempts);
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
}

fn jittered(base: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Periodic reaper for one table, following
/// `harness::dispatcher::lease_reaper_loop`'s sleep/shutdown-select shape.
pub async fn reaper_loop<Q>(
    queue: Arc<Q>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    Q: WorkQueue + 'static,
{
    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        if let Err(err) = queue.reap_expired(Utc::now()).await {
            tracing::warn!(event = "meshqueue.reaper.error", error = %err, "reap_expired failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}
