//! Ticket domain types: ingress payloads, events and client contracts.

use chrono::{DateTime, Utc};
use event_bus::EventHeader;
use event_consumer::Event;
use serde::{Deserialize, Deserializer, Serialize};

/// Currency assumed for events published before `currency` was introduced
pub const DEFAULT_CURRENCY: &str = "USD";

/// Legacy producers may send `null` or omit a field entirely; both decode to ""
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub amount: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub currency: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Money {
    fn repair_legacy(&mut self) {
        if self.currency.is_empty() {
            self.currency = DEFAULT_CURRENCY.to_string();
        }
    }
}

/// One ticket in a `POST /tickets-status` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatus {
    pub ticket_id: String,
    pub status: String,
    pub customer_email: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketsStatusRequest {
    pub tickets: Vec<TicketStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingConfirmed {
    pub header: EventHeader,
    pub ticket_id: String,
    pub customer_email: String,
    #[serde(default)]
    pub price: Money,
}

impl TicketBookingConfirmed {
    pub fn new(ticket_id: String, customer_email: String, price: Money) -> Self {
        Self {
            header: EventHeader::new(),
            ticket_id,
            customer_email,
            price,
        }
    }
}

impl Event for TicketBookingConfirmed {
    const NAME: &'static str = "TicketBookingConfirmed";

    fn repair_legacy(&mut self) {
        self.price.repair_legacy();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingCanceled {
    pub header: EventHeader,
    pub ticket_id: String,
    pub customer_email: String,
    #[serde(default)]
    pub price: Money,
}

impl TicketBookingCanceled {
    pub fn new(ticket_id: String, customer_email: String, price: Money) -> Self {
        Self {
            header: EventHeader::new(),
            ticket_id,
            customer_email,
            price,
        }
    }
}

impl Event for TicketBookingCanceled {
    const NAME: &'static str = "TicketBookingCanceled";

    fn repair_legacy(&mut self) {
        self.price.repair_legacy();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceiptRequest {
    pub ticket_id: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceiptResponse {
    pub receipt_number: String,
    pub issued_at: DateTime<Utc>,
}
