//! # Event Bus
//!
//! The transport layer underneath the ticket service's dispatch core.
//!
//! ## Model
//!
//! - A **topic** is an append-only sequence of [`BusMessage`]s.
//! - A [`Subscriber`] is bound to one **consumer group** when it is built.
//!   Every group keeps its own cursor over a topic, so two groups each see
//!   every message while two subscribers in one group compete for them.
//! - Every received message arrives as a [`Delivery`] that must be acked
//!   (removed from the group's pending set) or nacked (redelivered).
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS JetStream durable consumers
//! - **InMemoryBus**: Test/dev implementation with the same group semantics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{BusMessage, InMemoryBus, Publisher, Subscriber};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! bus.publish("TicketBookingConfirmed", vec![BusMessage::new(b"{}".to_vec())]).await?;
//!
//! let subscriber = bus.subscriber("issue-receipts");
//! let mut stream = subscriber.subscribe("TicketBookingConfirmed").await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("Received: {} bytes", delivery.message.payload.len());
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{
    format_rfc3339_nano, BusMessage, EventHeader, MessageContext, Metadata,
    CORRELATION_ID_METADATA_KEY, TYPE_METADATA_KEY,
};
pub use inmemory_bus::{InMemoryBus, InMemorySubscriber};
pub use nats_bus::{NatsBus, NatsSubscriber};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to topic: {0}")]
    SubscribeError(String),

    #[error("failed to acknowledge message: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Settles a single delivery with the transport
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the message as processed for this consumer group
    async fn ack(&self) -> BusResult<()>;

    /// Reject the message so the transport redelivers it to the group
    async fn nack(&self) -> BusResult<()>;
}

/// A received message together with the handle that settles it
pub struct Delivery {
    pub message: BusMessage,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: BusMessage, acker: impl Acknowledger + 'static) -> Self {
        Self {
            message,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> BusResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self) -> BusResult<()> {
        self.acker.nack().await
    }

    /// Split into the message and its acknowledger, so the message can be
    /// moved into a handler while the acknowledger settles it afterwards.
    pub fn into_parts(self) -> (BusMessage, Box<dyn Acknowledger>) {
        (self.message, self.acker)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Publishing half of the transport
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish messages to a topic, in order
    ///
    /// # Returns
    /// * `Ok(())` once every message is accepted by the transport
    /// * `Err(BusError)` on the first message that could not be published
    async fn publish(&self, topic: &str, messages: Vec<BusMessage>) -> BusResult<()>;
}

/// Consuming half of the transport, bound to one consumer group
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Consumer group this subscriber reads on behalf of
    fn consumer_group(&self) -> &str;

    /// Open a lazy, potentially infinite stream of deliveries for a topic
    ///
    /// # Returns
    /// * `Ok(BoxStream)` yielding deliveries; transient transport failures
    ///   surface as `Err` items without ending the stream
    /// * `Err(BusError)` if the subscription could not be established
    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, topic: &str, messages: Vec<BusMessage>) -> BusResult<()> {
        (**self).publish(topic, messages).await
    }
}

#[async_trait]
impl<S: Subscriber + ?Sized> Subscriber for Arc<S> {
    fn consumer_group(&self) -> &str {
        (**self).consumer_group()
    }

    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        (**self).subscribe(topic).await
    }
}

impl fmt::Debug for dyn Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Publisher")
    }
}

impl fmt::Debug for dyn Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscriber({})", self.consumer_group())
    }
}

/// Reject empty topics and topics containing whitespace
pub fn validate_topic(topic: &str) -> BusResult<()> {
    if topic.is_empty() {
        return Err(BusError::InvalidTopic("topic cannot be empty".to_string()));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidTopic(format!(
            "topic '{}' contains whitespace",
            topic
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("TicketBookingConfirmed").is_ok());
        assert!(validate_topic("tickets.confirmed").is_ok());
        assert!(matches!(validate_topic(""), Err(BusError::InvalidTopic(_))));
        assert!(matches!(
            validate_topic("two words"),
            Err(BusError::InvalidTopic(_))
        ));
    }
}
