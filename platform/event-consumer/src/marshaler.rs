//! JSON encoding of typed events into transport messages.
//!
//! The topic and the `type` metadata entry of an event are both its
//! [`Event::NAME`].

use event_bus::{BusMessage, TYPE_METADATA_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A domain event that can travel through the bus
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unqualified type name, used as topic and `type` metadata
    const NAME: &'static str;

    /// Normalize fields that older producers left out
    ///
    /// Runs after decoding and before the business handler sees the event.
    fn repair_legacy(&mut self) {}
}

/// Encodes events as JSON and tags them with their type name
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl JsonMarshaler {
    /// Build a message with a fresh uuid, JSON payload and `type` metadata
    pub fn marshal<E: Event>(&self, event: &E) -> Result<BusMessage, serde_json::Error> {
        Ok(self.marshal_raw(E::NAME, serde_json::to_vec(event)?))
    }

    pub fn unmarshal<E: Event>(&self, msg: &BusMessage) -> Result<E, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }

    /// Event type name recorded on a message, empty when absent
    pub fn name_from_message<'a>(&self, msg: &'a BusMessage) -> &'a str {
        msg.metadata.get(TYPE_METADATA_KEY)
    }

    pub(crate) fn marshal_raw(&self, name: &str, payload: Vec<u8>) -> BusMessage {
        let mut msg = BusMessage::new(payload);
        msg.metadata.set(TYPE_METADATA_KEY, name);
        msg
    }
}

/// An event emitted by a producer handler, already encoded
#[derive(Debug, Clone)]
pub struct DerivedEvent {
    name: &'static str,
    payload: Vec<u8>,
}

impl DerivedEvent {
    pub fn new<E: Event>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: E::NAME,
            payload: serde_json::to_vec(event)?,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn into_message(self, marshaler: &JsonMarshaler) -> BusMessage {
        marshaler.marshal_raw(self.name, self.payload)
    }
}
