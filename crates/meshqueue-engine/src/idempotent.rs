use async_trait::async_trait;
use chrono::Duration;
use meshqueue_core::{Handler, HandlerContext, HandlerResult, IdempotentHandler};
use meshqueue_storage::{IdempotencyStore, TryBeginOutcome};
use serde_json::Value;
use std::sync::Arc;

/// Adapts an `IdempotentHandler` into a plain `Handler` by driving the
/// idempotency store's begin/complete/fail pattern around `handle_once`.
/// The dispatcher loop sees an ordinary `Handler` and keeps its own
/// claim/ack/abandon/fail contract unchanged; this only guards the wrapped
/// business effect.
pub struct IdempotentHandlerAdapter<H: IdempotentHandler> {
    inner: Arc<H>,
    store: Arc<IdempotencyStore>,
    lock_duration: Duration,
}

impl<H: IdempotentHandler> IdempotentHandlerAdapter<H> {
    pub fn new(inner: Arc<H>, store: Arc<IdempotencyStore>, lock_duration: Duration) -> Self {
        Self {
            inner,
            store,
            lock_duration,
        }
    }
}

#[async_trait]
impl<H: IdempotentHandler> Handler for IdempotentHandlerAdapter<H> {
    async fn handle(&self, payload: Value, ctx: &HandlerContext) -> HandlerResult {
        let key = self.inner.idempotency_key(&payload);

        let outcome = match self
            .store
            .try_begin(&key, self.lock_duration, ctx.owner_token)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return HandlerResult::TransientError(err.to_string()),
        };

        match outcome {
            TryBeginOutcome::AlreadyCompleted => return HandlerResult::Ok,
            TryBeginOutcome::AlreadyFailed => {
                return HandlerResult::PermanentError(format!("idempotency key {key} already failed"))
            }
            TryBeginOutcome::AlreadyInProgress => {
                return HandlerResult::TransientError(format!("idempotency key {key} is locked elsewhere"))
            }
            TryBeginOutcome::Started => {}
        }

        match self.inner.handle_once(payload, ctx).await {
            HandlerResult::Ok => {
                if let Err(err) = self.store.complete(&key, ctx.owner_token).await {
                    return HandlerResult::TransientError(err.to_string());
                }
                HandlerResult::Ok
            }
            other => {
                if let Err(err) = self.store.fail(&key, ctx.owner_token).await {
                    return HandlerResult::TransientError(err.to_string());
                }
                other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshqueue_core::CancellationSignal;
    use tokio::sync::watch;

    struct AlwaysOk;

    #[async_trait]
    impl IdempotentHandler for AlwaysOk {
        fn idempotency_key(&self, payload: &Value) -> String {
            payload["key"].as_str().unwrap_or("default").to_string()
        }

        async fn handle_once(&self, _payload: Value, _ctx: &HandlerContext) -> HandlerResult {
            HandlerResult::Ok
        }
    }

    fn test_ctx() -> HandlerContext {
        let (_tx, rx) = watch::channel(false);
        HandlerContext {
            owner_token: uuid::Uuid::new_v4(),
            attempts: 0,
            cancellation: CancellationSignal::new(rx),
        }
    }

    #[test]
    fn key_derivation_reads_payload_field() {
        let handler = AlwaysOk;
        let key = handler.idempotency_key(&serde_json::json!({"key": "order-1"}));
        assert_eq!(key, "order-1");
    }

    #[test]
    fn missing_key_field_falls_back_to_default() {
        let handler = AlwaysOk;
        let key = handler.idempotency_key(&serde_json::json!({}));
        assert_eq!(key, "default");
        let _ = test_ctx();
    }
}
