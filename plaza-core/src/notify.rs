use async_trait::async_trait;

use crate::CoreResult;

/// Outbound domain-event sink consumed by the external notifier.
///
/// Callers log and swallow publish failures: delivery problems must never
/// roll back the state transition that produced the event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> CoreResult<()>;
}

/// No-op sink for tests and for deployments without a broker.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _topic: &str, _key: &str, _payload: &str) -> CoreResult<()> {
        Ok(())
    }
}
