use crate::config::{BusKind, Config};
use event_bus::{BusError, InMemoryBus, NatsBus, Publisher, Subscriber};
use std::sync::Arc;
use tracing::info;

/// Transport selected by `BUS_TYPE`
#[derive(Clone)]
pub enum Bus {
    InMemory(InMemoryBus),
    Nats(NatsBus),
}

impl Bus {
    pub async fn connect(config: &Config) -> Result<Self, BusError> {
        match config.bus_type {
            BusKind::InMemory => {
                info!("Using InMemory event bus");
                Ok(Bus::InMemory(InMemoryBus::new()))
            }
            BusKind::Nats => {
                info!(nats_url = %config.nats_url, "Connecting to NATS");
                let client = async_nats::connect(&config.nats_url)
                    .await
                    .map_err(|e| BusError::ConnectionError(e.to_string()))?;
                Ok(Bus::Nats(NatsBus::new(client)))
            }
        }
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        match self {
            Bus::InMemory(bus) => Arc::new(bus.clone()),
            Bus::Nats(bus) => Arc::new(bus.clone()),
        }
    }

    pub fn subscriber(&self, consumer_group: String) -> Arc<dyn Subscriber> {
        match self {
            Bus::InMemory(bus) => Arc::new(bus.subscriber(consumer_group)),
            Bus::Nats(bus) => Arc::new(bus.subscriber(consumer_group)),
        }
    }
}

/// Consumer group of a handler: `<prefix>.<handler name>`
pub fn consumer_group(prefix: &str, handler_name: &str) -> String {
    format!("{}.{}", prefix, handler_name)
}
