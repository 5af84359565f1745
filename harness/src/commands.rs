use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Duration as ChronoDuration;
use meshqueue_engine::{
    reaper_loop, run_loop, DispatcherLoopConfig, FanoutCoordinator, HandlerRegistry, LeaseHandle,
    Scheduler, StaticPlanner,
};
use meshqueue_storage::{
    FanoutCursorStore, FanoutPolicyStore, InboxStore, JobRunStore, JobStore, LeaseStore,
    OutboxStore, TimerStore,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::config::HarnessConfig;

async fn connect(cfg: &HarnessConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.state_database_url)
        .await
        .context("connect state db")
}

/// Resolves on SIGINT. The returned receiver flips to `true` exactly once,
/// matching the `watch`-channel shutdown shape every engine loop expects.
fn shutdown_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(event = "meshqueue.shutdown.signal", "ctrl-c received, shutting down");
        let _ = tx.send(true);
    });
    rx
}

fn dispatcher_config(cfg: &HarnessConfig) -> DispatcherLoopConfig {
    DispatcherLoopConfig {
        poll_interval: Duration::from_millis(cfg.worker_poll_ms),
        lease_seconds: cfg.lease_duration_secs,
        batch_size: cfg.batch_size,
        ..DispatcherLoopConfig::default()
    }
}

/// Runs the generic dispatcher plus its reaper for one table, until SIGINT.
/// `table` is one of `outbox`, `inbox`, `timers`, `job_runs`, mirroring
/// `harness::worker`'s single-table-per-process model.
pub async fn run_worker(cfg: &HarnessConfig, table: &str) -> anyhow::Result<()> {
    let pool = connect(cfg).await?;
    let registry = Arc::new(HandlerRegistry::builder().build());
    let loop_cfg = dispatcher_config(cfg);
    let reap_interval = Duration::from_millis(cfg.reap_poll_ms);
    let shutdown_rx = shutdown_watch();

    tracing::info!(event = "meshqueue.worker.start", table, "dispatcher starting");

    macro_rules! drive {
        ($store:expr) => {{
            let store = Arc::new($store);
            tokio::try_join!(
                run_loop(store.clone(), registry, loop_cfg, shutdown_rx.clone()),
                reaper_loop(store, reap_interval, shutdown_rx.clone()),
            )
            .map(|_| ())
        }};
    }

    let result = match table {
        "outbox" => drive!(OutboxStore::new(pool)),
        "inbox" => drive!(InboxStore::new(pool)),
        "timers" => drive!(TimerStore::new(pool)),
        "job_runs" => drive!(JobRunStore::new(pool)),
        other => bail!("unknown worker table {other:?}; expected outbox, inbox, timers, or job_runs"),
    };

    result.map_err(|err| anyhow::anyhow!("{err}"))
}

/// Runs just the reaper for one table, until SIGINT. Useful when the reaper
/// is deployed as its own process rather than piggybacked on a worker.
pub async fn run_reap(cfg: &HarnessConfig, table: &str) -> anyhow::Result<()> {
    let pool = connect(cfg).await?;
    let interval = Duration::from_millis(cfg.reap_poll_ms);
    let shutdown_rx = shutdown_watch();

    tracing::info!(event = "meshqueue.reap.start", table, "reaper starting");

    let result = match table {
        "outbox" => reaper_loop(Arc::new(OutboxStore::new(pool)), interval, shutdown_rx).await,
        "inbox" => reaper_loop(Arc::new(InboxStore::new(pool)), interval, shutdown_rx).await,
        "timers" => reaper_loop(Arc::new(TimerStore::new(pool)), interval, shutdown_rx).await,
        "job_runs" => reaper_loop(Arc::new(JobRunStore::new(pool)), interval, shutdown_rx).await,
        other => bail!("unknown reap table {other:?}; expected outbox, inbox, timers, or job_runs"),
    };

    result.map_err(|err| anyhow::anyhow!("{err}"))
}

/// Runs the cron/timer materialization loop under the `scheduler:materialize`
/// lease, until SIGINT or the lease is lost.
pub async fn run_scheduler(cfg: &HarnessConfig) -> anyhow::Result<()> {
    let pool = connect(cfg).await?;
    let leases = LeaseStore::new(pool.clone());
    let lease_duration = ChronoDuration::seconds(cfg.lease_duration_secs);

    let Some(lease) = LeaseHandle::acquire(
        leases,
        "scheduler:materialize",
        cfg.owner_token,
        lease_duration,
        0.5,
        serde_json::json!({}),
    )
    .await?
    else {
        bail!("scheduler:materialize lease already held by another process");
    };

    let scheduler = Scheduler::new(
        Arc::new(TimerStore::new(pool.clone())),
        Arc::new(JobStore::new(pool.clone())),
        Arc::new(JobRunStore::new(pool)),
    );

    let shutdown_rx = shutdown_watch();
    let lease_lost = lease.cancellation_signal();

    tracing::info!(event = "meshqueue.scheduler.start", fencing_token = lease.fencing_token(), "materialization loop starting");

    let result = tokio::select! {
        result = scheduler.run_materialization_loop(Duration::from_millis(cfg.worker_poll_ms), shutdown_rx) => {
            result.map_err(|err| anyhow::anyhow!("{err}"))
        }
        _ = lease_loss_signal(lease_lost) => {
            tracing::warn!(event = "meshqueue.scheduler.lease_lost", "materialization lease lost, exiting");
            Ok(())
        }
    };

    lease.dispose().await?;
    result
}

/// Runs one fan-out pass for `(topic, work_key)` under the
/// `fanout:{topic}:{work_key}` lease, then exits. Shard membership comes from
/// `MESHQUEUE_FANOUT_SHARDS` (comma-separated); unset or empty means no
/// shards are dispatched this pass.
pub async fn run_fanout(cfg: &HarnessConfig, topic: &str, work_key: &str) -> anyhow::Result<()> {
    let pool = connect(cfg).await?;
    let leases = LeaseStore::new(pool.clone());
    let lease_duration = ChronoDuration::seconds(cfg.lease_duration_secs);
    let resource = format!("fanout:{topic}:{work_key}");

    let Some(lease) = LeaseHandle::acquire(
        leases,
        resource.clone(),
        cfg.owner_token,
        lease_duration,
        0.5,
        serde_json::json!({}),
    )
    .await?
    else {
        bail!("{resource} lease already held by another process");
    };

    let shards: Vec<String> = std::env::var("MESHQUEUE_FANOUT_SHARDS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if shards.is_empty() {
        tracing::warn!(event = "meshqueue.fanout.no_shards", topic, work_key, "MESHQUEUE_FANOUT_SHARDS unset; nothing to dispatch");
    }

    let coordinator = FanoutCoordinator::new(
        Arc::new(StaticPlanner::new(shards)),
        Arc::new(FanoutPolicyStore::new(pool.clone())),
        Arc::new(FanoutCursorStore::new(pool.clone())),
        Arc::new(OutboxStore::new(pool)),
    );

    let dispatched = coordinator.run(topic, work_key, topic).await;
    lease.dispose().await?;

    let dispatched = dispatched.map_err(|err| anyhow::anyhow!("{err}"))?;
    tracing::info!(event = "meshqueue.fanout.done", topic, work_key, dispatched, "fan-out pass complete");
    Ok(())
}

async fn lease_loss_signal(mut signal: meshqueue_core::CancellationSignal) {
    signal.cancelled().await;
}
