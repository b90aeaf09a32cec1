//! # Event Processor
//!
//! Registers typed event handlers with a [`Router`]. For every handler the
//! processor:
//!
//! - subscribes to the topic named after the handled event type, through a
//!   subscriber built for that handler (so each handler has its own group)
//! - skips poison messages and messages whose `type` metadata names another
//!   event
//! - decodes the JSON payload and repairs legacy fields
//! - publishes any events a producer handler derives

use crate::error::{HandlerError, ProcessorError};
use crate::guard::{GuardDecision, MessageGuard};
use crate::marshaler::{DerivedEvent, Event, JsonMarshaler};
use crate::middleware::{HandlerFunc, HandlerResult};
use crate::publisher::EventPublisher;
use crate::router::Router;
use event_bus::{BusError, BusMessage, MessageContext, Subscriber};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs for building the subscriber of one handler
#[derive(Debug, Clone, Copy)]
pub struct SubscriberParams<'a> {
    pub handler_name: &'a str,
    pub event_name: &'static str,
}

pub type SubscriberConstructor =
    Arc<dyn Fn(SubscriberParams<'_>) -> Result<Arc<dyn Subscriber>, BusError> + Send + Sync>;

#[derive(Clone)]
pub struct EventProcessorConfig {
    pub subscriber_constructor: SubscriberConstructor,
    pub guard: MessageGuard,
    /// Required only when producer handlers are registered
    pub publisher: Option<EventPublisher>,
}

type DecodeOutcome = BoxFuture<'static, Result<Vec<DerivedEvent>, HandlerError>>;

trait DecodeAndHandle: Send + Sync {
    fn handle(&self, ctx: MessageContext, msg: &BusMessage) -> DecodeOutcome;
}

struct TypedHandler<E, F> {
    f: F,
    _event: PhantomData<fn() -> E>,
}

impl<E, F, Fut> DecodeAndHandle for TypedHandler<E, F>
where
    E: Event,
    F: Fn(MessageContext, E) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<DerivedEvent>>> + Send + 'static,
{
    fn handle(&self, ctx: MessageContext, msg: &BusMessage) -> DecodeOutcome {
        let mut event: E = match JsonMarshaler.unmarshal(msg) {
            Ok(event) => event,
            Err(e) => return futures::future::ready(Err(HandlerError::Decode(e))).boxed(),
        };
        event.repair_legacy();

        let fut = (self.f)(ctx, event);
        async move { fut.await.map_err(HandlerError::Handler) }.boxed()
    }
}

/// A named, typed handler for one event type
pub struct EventHandler {
    name: String,
    event_name: &'static str,
    produces: bool,
    inner: Arc<dyn DecodeAndHandle>,
}

impl EventHandler {
    /// Handler that only performs side effects
    pub fn consumer<E, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        E: Event,
        F: Fn(MessageContext, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let adapted = move |ctx: MessageContext, event: E| {
            let fut = f(ctx, event);
            async move { fut.await.map(|()| Vec::<DerivedEvent>::new()) }
        };
        Self {
            name: name.into(),
            event_name: E::NAME,
            produces: false,
            inner: Arc::new(TypedHandler::<E, _> {
                f: adapted,
                _event: PhantomData,
            }),
        }
    }

    /// Handler whose derived events are published to their own topics
    pub fn producer<E, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        E: Event,
        F: Fn(MessageContext, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<DerivedEvent>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            event_name: E::NAME,
            produces: true,
            inner: Arc::new(TypedHandler::<E, _> {
                f,
                _event: PhantomData,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name)
            .field("event_name", &self.event_name)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}

/// Adds typed event handlers to a router
pub struct EventProcessor<'r> {
    router: &'r mut Router,
    config: EventProcessorConfig,
}

impl<'r> EventProcessor<'r> {
    pub fn new(router: &'r mut Router, config: EventProcessorConfig) -> Self {
        Self { router, config }
    }

    pub fn add_handlers(
        &mut self,
        handlers: impl IntoIterator<Item = EventHandler>,
    ) -> Result<(), ProcessorError> {
        for handler in handlers {
            self.add_handler(handler)?;
        }
        Ok(())
    }

    pub fn add_handler(&mut self, handler: EventHandler) -> Result<(), ProcessorError> {
        let EventHandler {
            name,
            event_name,
            produces,
            inner,
        } = handler;

        let publisher = match (produces, &self.config.publisher) {
            (false, _) => None,
            (true, Some(publisher)) => Some(publisher.clone()),
            (true, None) => return Err(ProcessorError::MissingPublisher(name)),
        };

        let subscriber = (self.config.subscriber_constructor)(SubscriberParams {
            handler_name: &name,
            event_name,
        })
        .map_err(|source| ProcessorError::Subscriber {
            handler: name.clone(),
            source,
        })?;

        let guard = Arc::new(self.config.guard.clone());
        let func: HandlerFunc = Arc::new(move |msg: BusMessage| {
            dispatch(
                guard.clone(),
                inner.clone(),
                publisher.clone(),
                event_name,
                msg,
            )
            .boxed()
        });

        self.router
            .add_no_publisher_handler(name, event_name, subscriber, func)?;
        Ok(())
    }
}

async fn dispatch(
    guard: Arc<MessageGuard>,
    inner: Arc<dyn DecodeAndHandle>,
    publisher: Option<EventPublisher>,
    event_name: &'static str,
    msg: BusMessage,
) -> HandlerResult {
    match guard.check(&msg, event_name) {
        GuardDecision::Process => {}
        GuardDecision::SkipPoison => {
            warn!(message_uuid = %msg.uuid, "Skipping poison message");
            return Ok(Vec::new());
        }
        GuardDecision::SkipTypeMismatch { found } => {
            debug!(
                message_uuid = %msg.uuid,
                expected = event_name,
                found = %found,
                "Skipping message of another event type"
            );
            return Ok(Vec::new());
        }
    }

    let derived = inner.handle(msg.context.clone(), &msg).await?;
    if let Some(publisher) = publisher {
        publisher.publish_derived(&msg.context, derived).await?;
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryBus;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Event for Ping {
        const NAME: &'static str = "Ping";
    }

    fn config(bus: &InMemoryBus, publisher: Option<EventPublisher>) -> EventProcessorConfig {
        let bus = bus.clone();
        EventProcessorConfig {
            subscriber_constructor: Arc::new(move |params: SubscriberParams<'_>| {
                Ok::<_, BusError>(Arc::new(
                    bus.subscriber(format!("test.{}", params.handler_name)),
                ) as Arc<dyn Subscriber>)
            }),
            guard: MessageGuard::new(),
            publisher,
        }
    }

    #[test]
    fn test_handler_registered_under_its_name() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        EventProcessor::new(&mut router, config(&bus, None))
            .add_handler(EventHandler::consumer("ping-handler", |_ctx, _e: Ping| async {
                anyhow::Ok(())
            }))
            .unwrap();

        assert_eq!(router.handler_names(), vec!["ping-handler"]);
    }

    #[test]
    fn test_producer_requires_publisher() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        let err = EventProcessor::new(&mut router, config(&bus, None))
            .add_handler(EventHandler::producer("echo", |_ctx, e: Ping| async move {
                anyhow::Ok(vec![DerivedEvent::new(&e)?])
            }))
            .unwrap_err();

        assert!(matches!(err, ProcessorError::MissingPublisher(name) if name == "echo"));
    }

    #[test]
    fn test_duplicate_handler_surfaces_router_error() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        let mut processor = EventProcessor::new(&mut router, config(&bus, None));
        processor
            .add_handler(EventHandler::consumer("same", |_ctx, _e: Ping| async { anyhow::Ok(()) }))
            .unwrap();
        let err = processor
            .add_handler(EventHandler::consumer("same", |_ctx, _e: Ping| async { anyhow::Ok(()) }))
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessorError::Router(crate::error::RouterError::DuplicateHandler(_))
        ));
    }
}
