use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// Tagged result a handler reports; replaces exception-hierarchy dispatch.
#[derive(Debug, Clone)]
pub enum HandlerResult {
    Ok,
    TransientError(String),
    PermanentError(String),
}

/// Cancellation the handler should honor. Fires on worker shutdown or on
/// best-effort lease-expiry detection.
#[derive(Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct HandlerContext {
    pub owner_token: uuid::Uuid,
    pub attempts: i32,
    pub cancellation: CancellationSignal,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: Value, ctx: &HandlerContext) -> HandlerResult;
}

/// Decorates a `Handler` with at-most-once effect semantics via the
/// idempotency store. The wrapped handler still runs under the work-queue
/// engine's normal claim/ack/abandon/fail contract; this only guards the
/// *business effect* inside `handle`.
#[async_trait]
pub trait IdempotentHandler: Send + Sync {
    fn idempotency_key(&self, payload: &Value) -> String;
    async fn handle_once(&self, payload: Value, ctx: &HandlerContext) -> HandlerResult;
}
