use chrono::Duration;
use meshqueue_core::{CancellationSignal, Error, Result};
use meshqueue_storage::LeaseStore;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A held lease with background renewal at `duration * renew_percent`.
/// Modeled on `DispatcherServer`'s `shutdown_tx`/`JoinHandle` pairing:
/// dropping the handle doesn't stop renewal, `dispose` does.
pub struct LeaseHandle {
    resource: String,
    owner_token: Uuid,
    fencing_token: Arc<AtomicI64>,
    lost_tx: watch::Sender<bool>,
    cancel_renewal_tx: watch::Sender<bool>,
    renewal_task: Option<JoinHandle<()>>,
    store: LeaseStore,
}

impl LeaseHandle {
    /// Acquires `resource` and, on success, spawns a background renewal loop
    /// firing every `duration * renew_percent`. Two consecutive failed
    /// renewals mark the lease lost and fire `cancellation_signal`.
    pub async fn acquire(
        store: LeaseStore,
        resource: impl Into<String>,
        owner_token: Uuid,
        duration: Duration,
        renew_percent: f64,
        context: serde_json::Value,
    ) -> Result<Option<Self>> {
        let resource = resource.into();
        let Some(outcome) = store.acquire(&resource, duration, owner_token, context).await? else {
            return Ok(None);
        };

        let fencing_token = Arc::new(AtomicI64::new(outcome.fencing_token));
        let (lost_tx, _) = watch::channel(false);
        let (cancel_renewal_tx, cancel_renewal_rx) = watch::channel(false);

        let renewal_task = tokio::spawn(renewal_loop(
            store.clone(),
            resource.clone(),
            owner_token,
            duration,
            renew_percent,
            fencing_token.clone(),
            lost_tx.clone(),
            cancel_renewal_rx,
        ));

        Ok(Some(Self {
            resource,
            owner_token,
            fencing_token,
            lost_tx,
            cancel_renewal_tx,
            renewal_task: Some(renewal_task),
            store,
        }))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn fencing_token(&self) -> i64 {
        self.fencing_token.load(Ordering::SeqCst)
    }

    /// Fires when the lease is observed lost (failed renewal or disposal).
    pub fn cancellation_signal(&self) -> CancellationSignal {
        CancellationSignal::new(self.lost_tx.subscribe())
    }

    pub fn is_lost(&self) -> bool {
        *self.lost_tx.borrow()
    }

    pub fn throw_if_lost(&self) -> Result<()> {
        if self.is_lost() {
            return Err(Error::LostLease);
        }
        Ok(())
    }

    /// Attempts an immediate renewal outside the background cadence.
    pub async fn try_renew_now(&self, duration: Duration) -> Result<bool> {
        match self
            .store
            .renew(&self.resource, self.owner_token, duration)
            .await?
        {
            Some(outcome) => {
                self.fencing_token.store(outcome.fencing_token, Ordering::SeqCst);
                Ok(true)
            }
            None => {
                let _ = self.lost_tx.send(true);
                Ok(false)
            }
        }
    }

    /// Releases the lease cooperatively. Idempotent; safe to call more than
    /// once or after the lease was already observed lost.
    pub async fn dispose(mut self) -> Result<()> {
        let _ = self.cancel_renewal_tx.send(true);
        if let Some(task) = self.renewal_task.take() {
            let _ = task.await;
        }
        if !self.is_lost() {
            self.store.release(&self.resource, self.owner_token).await?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn renewal_loop(
    store: LeaseStore,
    resource: String,
    owner_token: Uuid,
    duration: Duration,
    renew_percent: f64,
    fencing_token: Arc<AtomicI64>,
    lost_tx: watch::Sender<bool>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let renew_every = duration
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
        .mul_f64(renew_percent.clamp(0.05, 0.95));

    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(renew_every) => {}
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    return;
                }
            }
        }

        if *cancel_rx.borrow() {
            return;
        }

        match store.renew(&resource, owner_token, duration).await {
            Ok(Some(outcome)) => {
                fencing_token.store(outcome.fencing_token, Ordering::SeqCst);
                consecutive_failures = 0;
            }
            Ok(None) => {
                consecutive_failures += 1;
                tracing::warn!(
                    event = "meshqueue.lease.renew.rejected",
                    resource = %resource,
                    consecutive_failures,
                    "lease renewal rejected"
                );
                if consecutive_failures >= 2 {
                    let _ = lost_tx.send(true);
                    return;
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                tracing::warn!(
                    event = "meshqueue.lease.renew.error",
                    resource = %resource,
                    error = %err,
                    consecutive_failures,
                    "lease renewal storage error"
                );
                if consecutive_failures >= 2 {
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        }
    }
}
