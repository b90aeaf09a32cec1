//! Publishing path for typed events.

use crate::error::PublishError;
use crate::marshaler::{DerivedEvent, Event, JsonMarshaler};
use async_trait::async_trait;
use event_bus::{BusMessage, BusResult, MessageContext, Publisher, CORRELATION_ID_METADATA_KEY};
use std::sync::Arc;
use tracing::debug;

/// Publishes typed events to the topic named after their type
#[derive(Clone)]
pub struct EventPublisher {
    publisher: Arc<dyn Publisher>,
    marshaler: JsonMarshaler,
}

impl EventPublisher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            marshaler: JsonMarshaler,
        }
    }

    /// Encode `event` and publish it under the processing context `ctx`
    pub async fn publish<E: Event>(
        &self,
        ctx: &MessageContext,
        event: &E,
    ) -> Result<(), PublishError> {
        let msg = self
            .marshaler
            .marshal(event)
            .map_err(|source| PublishError::Marshal {
                event: E::NAME.to_string(),
                source,
            })?
            .with_context(ctx.clone());

        debug!(event = E::NAME, message_uuid = %msg.uuid, "Publishing event");
        self.publisher.publish(E::NAME, vec![msg]).await?;
        Ok(())
    }

    /// Publish already-encoded events in order, each to its own topic
    pub async fn publish_derived(
        &self,
        ctx: &MessageContext,
        events: Vec<DerivedEvent>,
    ) -> Result<(), PublishError> {
        for event in events {
            let topic = event.name();
            let msg = event
                .into_message(&self.marshaler)
                .with_context(ctx.clone());
            debug!(event = topic, message_uuid = %msg.uuid, "Publishing derived event");
            self.publisher.publish(topic, vec![msg]).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

/// Copies the context correlation id into outgoing message metadata
///
/// Messages that already carry a `correlation_id` entry are left alone.
#[derive(Debug, Clone)]
pub struct CorrelationPublisher<P> {
    inner: P,
}

impl<P: Publisher> CorrelationPublisher<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for CorrelationPublisher<P> {
    async fn publish(&self, topic: &str, mut messages: Vec<BusMessage>) -> BusResult<()> {
        for msg in &mut messages {
            if msg.metadata.contains(CORRELATION_ID_METADATA_KEY) {
                continue;
            }
            if let Some(id) = msg.context.correlation_id().map(str::to_string) {
                msg.metadata.set(CORRELATION_ID_METADATA_KEY, id);
            }
        }
        self.inner.publish(topic, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{InMemoryBus, TYPE_METADATA_KEY};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct RefundIssued {
        ticket_id: String,
    }

    impl Event for RefundIssued {
        const NAME: &'static str = "RefundIssued";
    }

    #[tokio::test]
    async fn test_publish_uses_event_name_as_topic() {
        let bus = InMemoryBus::new();
        let publisher = EventPublisher::new(Arc::new(CorrelationPublisher::new(bus.clone())));
        let ctx = MessageContext::new().with_correlation_id("corr-7");

        publisher
            .publish(
                &ctx,
                &RefundIssued {
                    ticket_id: "t-1".to_string(),
                },
            )
            .await
            .unwrap();

        let published = bus.published("RefundIssued");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].metadata.get(TYPE_METADATA_KEY), "RefundIssued");
        assert_eq!(
            published[0].metadata.get(CORRELATION_ID_METADATA_KEY),
            "corr-7"
        );
    }

    #[tokio::test]
    async fn test_existing_correlation_metadata_is_kept() {
        let bus = InMemoryBus::new();
        let publisher = CorrelationPublisher::new(bus.clone());

        let mut msg = BusMessage::new(b"{}".to_vec())
            .with_context(MessageContext::new().with_correlation_id("from-context"));
        msg.metadata.set(CORRELATION_ID_METADATA_KEY, "explicit");
        publisher.publish("topic", vec![msg]).await.unwrap();

        let published = bus.published("topic");
        assert_eq!(
            published[0].metadata.get(CORRELATION_ID_METADATA_KEY),
            "explicit"
        );
    }

    #[tokio::test]
    async fn test_no_correlation_without_context() {
        let bus = InMemoryBus::new();
        let publisher = CorrelationPublisher::new(bus.clone());

        publisher
            .publish("topic", vec![BusMessage::new(b"{}".to_vec())])
            .await
            .unwrap();

        assert!(!bus.published("topic")[0]
            .metadata
            .contains(CORRELATION_ID_METADATA_KEY));
    }
}
