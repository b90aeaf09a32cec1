//! # Event Consumer
//!
//! Consumer-side dispatch on top of [`event_bus`]:
//!
//! - [`Router`]: one consume loop per handler, ack on success, nack on error
//! - [`middleware`]: recovery, retry, correlation and logging layers
//! - [`EventProcessor`]: typed JSON event handlers keyed by event type name
//! - [`EventPublisher`] / [`CorrelationPublisher`]: the publishing path
//! - [`MessageGuard`]: poison list and event type filter
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{consumer_retry::RetryConfig, BusError, InMemoryBus, Subscriber};
//! use event_consumer::{
//!     default_middlewares, Event, EventHandler, EventProcessor, EventProcessorConfig,
//!     MessageGuard, Router, SubscriberParams,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SeatReserved {
//!     seat: String,
//! }
//!
//! impl Event for SeatReserved {
//!     const NAME: &'static str = "SeatReserved";
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let mut router = Router::new();
//! for middleware in default_middlewares(RetryConfig::default())? {
//!     router.add_middleware(middleware);
//! }
//!
//! let subscriber_bus = bus.clone();
//! let config = EventProcessorConfig {
//!     subscriber_constructor: Arc::new(move |params: SubscriberParams<'_>| {
//!         let subscriber: Arc<dyn Subscriber> =
//!             Arc::new(subscriber_bus.subscriber(params.handler_name));
//!         Ok::<_, BusError>(subscriber)
//!     }),
//!     guard: MessageGuard::new(),
//!     publisher: None,
//! };
//! EventProcessor::new(&mut router, config).add_handler(EventHandler::consumer(
//!     "print-seat",
//!     |_ctx, event: SeatReserved| async move {
//!         println!("reserved {}", event.seat);
//!         anyhow::Ok(())
//!     },
//! ))?;
//!
//! router.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod guard;
mod marshaler;
pub mod middleware;
mod processor;
mod publisher;
mod router;

pub use error::{HandlerError, ProcessorError, PublishError, RouterError};
pub use guard::{GuardDecision, MessageGuard};
pub use marshaler::{DerivedEvent, Event, JsonMarshaler};
pub use middleware::{default_middlewares, handler_fn, HandlerFunc, HandlerResult, Middleware};
pub use processor::{
    EventHandler, EventProcessor, EventProcessorConfig, SubscriberConstructor, SubscriberParams,
};
pub use publisher::{CorrelationPublisher, EventPublisher};
pub use router::{Router, RunningSignal};
