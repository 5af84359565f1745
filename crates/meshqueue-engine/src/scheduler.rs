use chrono::{DateTime, Utc};
use cron::Schedule;
use meshqueue_core::{Error, Result};
use meshqueue_storage::{JobRunStore, JobStore, TimerStore};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One-shot timers plus cron-job materialization, serialized via a lease on
/// `scheduler:materialize`. `cron` stands in for the pack's non-fetchable
/// `apalis-cron` intra-workspace dependency (see DESIGN.md).
#[derive(Clone)]
pub struct Scheduler {
    timers: Arc<TimerStore>,
    jobs: Arc<JobStore>,
    job_runs: Arc<JobRunStore>,
}

impl Scheduler {
    pub fn new(timers: Arc<TimerStore>, jobs: Arc<JobStore>, job_runs: Arc<JobRunStore>) -> Self {
        Self {
            timers,
            jobs,
            job_runs,
        }
    }

    pub async fn schedule_timer(
        &self,
        topic: &str,
        payload: Value,
        due_at: DateTime<Utc>,
    ) -> Result<uuid::Uuid> {
        self.timers.schedule_timer(topic, payload, due_at).await
    }

    pub async fn cancel_timer(&self, timer_id: uuid::Uuid) -> Result<bool> {
        self.timers.cancel_timer(timer_id).await
    }

    /// Upserts the Job and computes `next_run_at` from the cron expression
    /// relative to now.
    pub async fn create_or_update_job(
        &self,
        name: &str,
        topic: &str,
        cron_expression: &str,
        payload: Value,
    ) -> Result<()> {
        let schedule = parse_schedule(cron_expression)?;
        let next_run_at = schedule.after(&Utc::now()).next();
        self.jobs
            .create_or_update(name, topic, cron_expression, payload, next_run_at)
            .await
    }

    pub async fn delete_job(&self, name: &str) -> Result<()> {
        self.jobs.delete(name).await?;
        self.job_runs.delete_ready_for_job(name).await?;
        Ok(())
    }

    pub async fn trigger_job(&self, name: &str) -> Result<Option<uuid::Uuid>> {
        let job = self
            .jobs
            .get(name)
            .await?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("job {name} not found")))?;
        self.job_runs
            .trigger(name, &job.topic, job.payload, Utc::now())
            .await
    }

    /// One pass of the materialization loop: for each
    /// due job, insert a JobRun and advance `last_run_at`/`next_run_at` in a
    /// single transaction, enforcing the unique `(job_name, scheduled_at)`
    /// index as the duplicate-suppression mechanism.
    pub async fn materialize_once(&self, now: DateTime<Utc>) -> Result<u64> {
        let due = self.jobs.due_jobs(now).await?;
        let mut materialized = 0u64;

        for job in due {
            let scheduled_at = match job.next_run_at {
                Some(t) => t,
                None => continue,
            };
            let schedule = parse_schedule(&job.cron_expression)?;
            let next_run_at = schedule.after(&now).next();

            let mut tx = self.jobs.begin().await?;
            let inserted = self
                .job_runs
                .insert_if_absent(&mut tx, &job.name, scheduled_at, &job.topic, job.payload.clone())
                .await?;
            self.jobs
                .advance(&mut tx, &job.name, scheduled_at, next_run_at)
                .await?;
            tx.commit().await.map_err(Error::from)?;

            if inserted.is_some() {
                materialized += 1;
            }
        }

        Ok(materialized)
    }

    /// Earliest of the minimum Ready-timer `due_at` and minimum enabled-job
    /// `next_run_at`, used by the dispatcher to sleep precisely.
    pub async fn get_next_event_time(&self) -> Result<Option<DateTime<Utc>>> {
        let timer_due = self.timers.min_ready_due_at().await?;
        let job_due = self.jobs.min_next_run_at().await?;

        Ok(match (timer_due, job_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        })
    }

    /// Materialization loop under a lease, following
    /// `harness::dispatcher::lease_reaper_loop`'s sleep/shutdown-select shape.
    /// The caller is expected to hold the `scheduler:materialize` lease for
    /// the duration of this loop.
    pub async fn run_materialization_loop(
        &self,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            if let Err(err) = self.materialize_once(Utc::now()).await {
                tracing::warn!(event = "meshqueue.scheduler.materialize.error", error = %err, "materialization pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }
}

fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr)
        .map_err(|err| Error::Other(anyhow::anyhow!("invalid cron expression {expr}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_five_field_expression() {
        let schedule = parse_schedule("0 */5 * * * *").unwrap();
        let next = schedule.after(&Utc::now()).next();
        assert!(next.is_some());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(parse_schedule("not a cron expr").is_err());
    }
}
