//! NATS JetStream implementation of the transport traits

use crate::{
    validate_topic, Acknowledger, BusError, BusMessage, BusResult, Delivery, Metadata, Publisher,
    Subscriber,
};
use async_nats::jetstream::{self, consumer::pull, AckKind};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

/// Header carrying the message uuid
const UUID_HEADER: &str = "Message-Uuid";

/// JetStream publish deduplication header
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Transport implementation using NATS JetStream
///
/// This is the production implementation. Each topic is backed by its own
/// stream and each consumer group by a durable pull consumer on that stream,
/// so groups track their offsets independently and unacked messages are
/// redelivered by the server.
///
/// Metadata travels as NATS headers.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BusMessage, NatsBus, Publisher};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.publish("TicketBookingConfirmed", vec![BusMessage::new(b"{}".to_vec())]).await?;
/// let subscriber = bus.subscriber("svc-tickets.issue-receipt-handler");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build a subscriber bound to `consumer_group`
    pub fn subscriber(&self, consumer_group: impl Into<String>) -> NatsSubscriber {
        NatsSubscriber {
            bus: self.clone(),
            consumer_group: consumer_group.into(),
        }
    }

    async fn ensure_stream(&self, topic: &str) -> BusResult<jetstream::stream::Stream> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: sanitize_name(topic),
                subjects: vec![topic.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl Publisher for NatsBus {
    async fn publish(&self, topic: &str, messages: Vec<BusMessage>) -> BusResult<()> {
        validate_topic(topic)?;
        self.ensure_stream(topic).await?;

        for message in messages {
            let mut headers = HeaderMap::new();
            headers.insert(UUID_HEADER, message.uuid.as_str());
            headers.insert(MSG_ID_HEADER, message.uuid.as_str());
            for (key, value) in message.metadata.iter() {
                headers.insert(key.as_str(), value.as_str());
            }

            let ack = self
                .jetstream
                .publish_with_headers(topic.to_string(), headers, message.payload.into())
                .await
                .map_err(|e| BusError::PublishError(e.to_string()))?;

            // Wait for the server to persist the message
            ack.await
                .map_err(|e| BusError::PublishError(e.to_string()))?;
        }

        Ok(())
    }
}

/// Subscriber reading a [`NatsBus`] through one durable consumer
#[derive(Clone)]
pub struct NatsSubscriber {
    bus: NatsBus,
    consumer_group: String,
}

#[async_trait]
impl Subscriber for NatsSubscriber {
    fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        validate_topic(topic)?;
        let stream = self.bus.ensure_stream(topic).await?;

        let durable = sanitize_name(&self.consumer_group);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: topic.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let deliveries = messages.map(|result| match result {
            Ok(message) => {
                let bus_message =
                    to_bus_message(message.message.headers.as_ref(), &message.message.payload);
                Ok(Delivery::new(bus_message, NatsAcker { message }))
            }
            Err(e) => Err(BusError::SubscribeError(e.to_string())),
        });

        Ok(deliveries.boxed())
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }

    async fn nack(&self) -> BusResult<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

/// Convert a raw NATS message into a [`BusMessage`]
///
/// The uuid comes from the `Message-Uuid` header; messages published by
/// other producers without it get a fresh one.
fn to_bus_message(headers: Option<&HeaderMap>, payload: &[u8]) -> BusMessage {
    let mut uuid = None;
    let mut metadata = Metadata::new();

    if let Some(nats_headers) = headers {
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            let Some(value) = values.first() else {
                continue;
            };
            match key.to_string().as_str() {
                UUID_HEADER => uuid = Some(value.to_string()),
                MSG_ID_HEADER => {}
                name => metadata.set(name, value.to_string()),
            }
        }
    }

    let message = match uuid {
        Some(uuid) => BusMessage::with_uuid(uuid, payload.to_vec()),
        None => BusMessage::new(payload.to_vec()),
    };
    message.with_metadata(metadata)
}

/// Stream and durable consumer names may not contain `.`, `*`, `>` or whitespace
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
