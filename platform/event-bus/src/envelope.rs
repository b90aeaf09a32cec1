//! # Message Envelope
//!
//! The unit of transport shared by every publisher, subscriber and handler.
//!
//! ## Envelope Fields
//!
//! - `uuid`: Unique identifier of one logical message (deduplication, poison lists)
//! - `payload`: Raw bytes, JSON-encoded domain event for the ticket service
//! - `metadata`: Ordered string map; written by the transport and by middleware only
//! - `context`: Per-delivery processing scope (correlation id, cancellation)
//!
//! The context never crosses the wire. Transports rebuild a fresh one on
//! delivery, and middleware fills it in before the business handler runs.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reserved metadata key holding the event type name
pub const TYPE_METADATA_KEY: &str = "type";

/// Reserved metadata key holding the correlation id
pub const CORRELATION_ID_METADATA_KEY: &str = "correlation_id";

/// Ordered string-to-string metadata attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, or an empty string when the key is absent
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Processing scope carried alongside a message while it is handled
///
/// Populated by the router (handler name, cancellation) and by the
/// correlation middleware. Business code only reads it.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    correlation_id: Option<String>,
    handler_name: Option<String>,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_handler_name(mut self, handler_name: impl Into<String>) -> Self {
        self.handler_name = Some(handler_name.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn handler_name(&self) -> Option<&str> {
        self.handler_name.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A message flowing through the transport
///
/// # Examples
///
/// ```rust
/// use event_bus::BusMessage;
///
/// let mut msg = BusMessage::new(b"{}".to_vec());
/// msg.metadata.set("type", "TicketBookingConfirmed");
/// assert_eq!(msg.metadata.get("type"), "TicketBookingConfirmed");
/// assert_eq!(msg.metadata.get("missing"), "");
/// ```
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Unique message identifier
    pub uuid: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Transport metadata
    pub metadata: Metadata,
    /// Processing scope, never serialized
    pub context: MessageContext,
}

impl BusMessage {
    /// Create a message with a freshly generated uuid
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_uuid(Uuid::new_v4().to_string(), payload)
    }

    /// Create a message with an explicit uuid (transports and tests)
    pub fn with_uuid(uuid: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            uuid: uuid.into(),
            payload,
            metadata: Metadata::new(),
            context: MessageContext::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    /// Copy of this message with the same uuid, payload and metadata but a
    /// default context. Used by transports when storing messages.
    pub fn detached(&self) -> Self {
        Self {
            uuid: self.uuid.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            context: MessageContext::new(),
        }
    }
}

/// Header embedded at the top of every domain event payload
///
/// Generated once when the event is created and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub id: String,
    /// RFC 3339 UTC timestamp, up to nine fractional digits with trailing
    /// zeros trimmed (`2023-05-01T10:00:00.12Z`, `2023-05-01T10:00:00Z`)
    pub published_at: String,
}

impl EventHeader {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            published_at: format_rfc3339_nano(Utc::now()),
        }
    }
}

/// Format `ts` as RFC 3339 in UTC with at most nanosecond precision and no
/// trailing zeros in the fraction
pub fn format_rfc3339_nano(ts: DateTime<Utc>) -> String {
    let formatted = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
    match formatted.split_once('.') {
        Some((seconds, fraction)) => {
            let digits = fraction.trim_end_matches('Z').trim_end_matches('0');
            if digits.is_empty() {
                format!("{}Z", seconds)
            } else {
                format!("{}.{}Z", seconds, digits)
            }
        }
        None => formatted,
    }
}

impl Default for EventHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation_generates_unique_ids() {
        let a = BusMessage::new(b"a".to_vec());
        let b = BusMessage::new(b"b".to_vec());

        assert_ne!(a.uuid, b.uuid);
        assert!(Uuid::parse_str(&a.uuid).is_ok());
        assert!(a.metadata.is_empty());
        assert!(a.context.correlation_id().is_none());
    }

    #[test]
    fn test_metadata_missing_key_is_empty() {
        let mut metadata = Metadata::new();
        metadata.set(CORRELATION_ID_METADATA_KEY, "corr-1");

        assert_eq!(metadata.get(CORRELATION_ID_METADATA_KEY), "corr-1");
        assert_eq!(metadata.get(TYPE_METADATA_KEY), "");
        assert!(!metadata.contains(TYPE_METADATA_KEY));
    }

    #[test]
    fn test_metadata_is_ordered() {
        let mut metadata = Metadata::new();
        metadata.set("b", "2");
        metadata.set("a", "1");

        let keys: Vec<&String> = metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_detached_drops_context() {
        let msg = BusMessage::new(b"x".to_vec())
            .with_context(MessageContext::new().with_correlation_id("corr"));
        let stored = msg.detached();

        assert_eq!(stored.uuid, msg.uuid);
        assert!(stored.context.correlation_id().is_none());
    }

    #[test]
    fn test_event_header_timestamp_is_rfc3339() {
        let header = EventHeader::new();

        assert!(chrono::DateTime::parse_from_rfc3339(&header.published_at).is_ok());
        assert!(header.published_at.ends_with('Z'));
        if let Some((_, fraction)) = header.published_at.split_once('.') {
            let digits = fraction.trim_end_matches('Z');
            assert!(digits.len() <= 9);
            assert!(!digits.ends_with('0'));
        }
    }

    #[test]
    fn test_rfc3339_nano_trims_trailing_zeros() {
        let at = |nanos| DateTime::from_timestamp(1_682_935_200, nanos).unwrap();

        assert_eq!(format_rfc3339_nano(at(0)), "2023-05-01T10:00:00Z");
        assert_eq!(format_rfc3339_nano(at(120_000_000)), "2023-05-01T10:00:00.12Z");
        assert_eq!(
            format_rfc3339_nano(at(5)),
            "2023-05-01T10:00:00.000000005Z"
        );
        assert_eq!(
            format_rfc3339_nano(at(123_456_789)),
            "2023-05-01T10:00:00.123456789Z"
        );
    }
}
