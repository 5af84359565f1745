use meshqueue_core::Handler;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps topic names to the handler that processes them. One registry is
/// shared by every dispatcher loop running against a given `WorkQueue`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(topic).cloned()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, topic: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(topic.into(), handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshqueue_core::{HandlerContext, HandlerResult};
    use serde_json::Value;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _payload: Value, _ctx: &HandlerContext) -> HandlerResult {
            HandlerResult::Ok
        }
    }

    #[test]
    fn registered_topic_resolves_unregistered_does_not() {
        let registry = HandlerRegistry::builder()
            .register("orders.created", Arc::new(NoopHandler))
            .build();

        assert!(registry.get("orders.created").is_some());
        assert!(registry.get("orders.unknown").is_none());
    }
}
