//! # Message Router
//!
//! Binds handlers to topics and runs one consume loop per handler.
//!
//! ## Lifecycle
//!
//! 1. Register handlers and middlewares while the router is idle
//! 2. [`Router::run`] subscribes every handler, then fires the running signal
//! 3. Each loop pulls a delivery, runs it through the middleware chain and
//!    acks it on success (after publishing any produced messages) or nacks it
//!    on failure
//! 4. Cancelling the shutdown token stops the loops once their current
//!    message is settled; `run` returns after all loops have exited

use crate::error::{HandlerError, RouterError};
use crate::middleware::{apply_middlewares, HandlerFunc, Middleware};
use event_bus::{
    validate_topic, Acknowledger, BusMessage, Delivery, MessageContext, Publisher, Subscriber,
};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct HandlerEntry {
    name: String,
    subscribe_topic: String,
    subscriber: Arc<dyn Subscriber>,
    publish: Option<(String, Arc<dyn Publisher>)>,
    handler: HandlerFunc,
}

/// Resolves once the router has subscribed all handlers and started consuming
#[derive(Debug, Clone)]
pub struct RunningSignal {
    rx: watch::Receiver<bool>,
}

impl RunningSignal {
    pub async fn wait(mut self) {
        // Only fails if the router was dropped, which can never start it
        let _ = self.rx.wait_for(|running| *running).await;
    }

    pub fn is_running(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Dispatches messages from subscribed topics to registered handlers
pub struct Router {
    handlers: Vec<HandlerEntry>,
    names: HashSet<String>,
    middlewares: Vec<Arc<dyn Middleware>>,
    running: watch::Sender<bool>,
    started: AtomicBool,
}

impl Router {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            handlers: Vec::new(),
            names: HashSet::new(),
            middlewares: Vec::new(),
            running,
            started: AtomicBool::new(false),
        }
    }

    /// Append a middleware; earlier middlewares wrap later ones
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Register a handler whose produced messages go to `publish_topic`
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        publish_topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        handler: HandlerFunc,
    ) -> Result<(), RouterError> {
        let name = name.into();
        let publish_topic = publish_topic.into();
        validate_topic(&publish_topic).map_err(|source| RouterError::InvalidTopic {
            handler: name.clone(),
            source,
        })?;
        self.register(
            name,
            subscribe_topic.into(),
            subscriber,
            Some((publish_topic, publisher)),
            handler,
        )
    }

    /// Register a handler that consumes without producing messages
    pub fn add_no_publisher_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        handler: HandlerFunc,
    ) -> Result<(), RouterError> {
        self.register(name.into(), subscribe_topic.into(), subscriber, None, handler)
    }

    fn register(
        &mut self,
        name: String,
        subscribe_topic: String,
        subscriber: Arc<dyn Subscriber>,
        publish: Option<(String, Arc<dyn Publisher>)>,
        handler: HandlerFunc,
    ) -> Result<(), RouterError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }
        if name.is_empty() {
            return Err(RouterError::EmptyHandlerName);
        }
        if self.names.contains(&name) {
            return Err(RouterError::DuplicateHandler(name));
        }
        validate_topic(&subscribe_topic).map_err(|source| RouterError::InvalidTopic {
            handler: name.clone(),
            source,
        })?;

        debug!(
            handler = %name,
            topic = %subscribe_topic,
            consumer_group = %subscriber.consumer_group(),
            "Registered handler"
        );
        self.names.insert(name.clone());
        self.handlers.push(HandlerEntry {
            name,
            subscribe_topic,
            subscriber,
            publish,
            handler,
        });
        Ok(())
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn running(&self) -> RunningSignal {
        RunningSignal {
            rx: self.running.subscribe(),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Subscribe all handlers and consume until `shutdown` is cancelled
    ///
    /// # Returns
    /// * `Ok(())` once every consume loop has stopped
    /// * `Err(RouterError)` if a subscription fails (before the running
    ///   signal fires) or a consume loop terminates abnormally
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), RouterError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }
        if self.handlers.is_empty() {
            warn!("Router started without handlers");
        }

        let mut loops = Vec::with_capacity(self.handlers.len());
        for entry in &self.handlers {
            let stream = entry
                .subscriber
                .subscribe(&entry.subscribe_topic)
                .await
                .map_err(|source| RouterError::Subscribe {
                    handler: entry.name.clone(),
                    topic: entry.subscribe_topic.clone(),
                    source,
                })?;

            info!(
                handler = %entry.name,
                topic = %entry.subscribe_topic,
                consumer_group = %entry.subscriber.consumer_group(),
                "Subscribed to topic"
            );

            loops.push((
                ConsumeLoop {
                    name: entry.name.clone(),
                    publish: entry.publish.clone(),
                    handler: apply_middlewares(&self.middlewares, entry.handler.clone()),
                },
                stream,
            ));
        }

        let loops_token = shutdown.child_token();
        let mut tasks = JoinSet::new();
        for (consume, stream) in loops {
            tasks.spawn(consume.run(stream, loops_token.clone()));
        }

        self.running.send_replace(true);
        info!(handlers = self.handlers.len(), "Router is running");

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consume loop terminated abnormally, stopping router");
                loops_token.cancel();
                if result.is_ok() {
                    result = Err(RouterError::LoopPanicked(e.to_string()));
                }
            }
        }

        info!("Router stopped");
        result
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

struct ConsumeLoop {
    name: String,
    publish: Option<(String, Arc<dyn Publisher>)>,
    handler: HandlerFunc,
}

impl ConsumeLoop {
    async fn run(
        self,
        mut stream: BoxStream<'static, event_bus::BusResult<Delivery>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        warn!(handler = %self.name, error = %e, "Failed to receive message");
                        continue;
                    }
                    None => {
                        warn!(handler = %self.name, "Subscription closed");
                        break;
                    }
                },
            };

            // The in-flight message always runs to completion and is settled
            self.handle(delivery, &shutdown).await;
        }

        info!(handler = %self.name, "Handler stopped");
    }

    async fn handle(&self, delivery: Delivery, shutdown: &CancellationToken) {
        let (mut message, acker) = delivery.into_parts();
        let message_uuid = message.uuid.clone();
        message.context = MessageContext::new()
            .with_handler_name(&self.name)
            .with_cancellation(shutdown.child_token());

        match (self.handler)(message).await {
            Ok(produced) => {
                if let Err(e) = self.publish_produced(produced).await {
                    error!(
                        handler = %self.name,
                        message_uuid = %message_uuid,
                        error = %e,
                        "Failed to publish produced messages, nacking"
                    );
                    self.settle(acker.as_ref(), &message_uuid, false).await;
                    return;
                }
                self.settle(acker.as_ref(), &message_uuid, true).await;
            }
            Err(e) => {
                debug!(
                    handler = %self.name,
                    message_uuid = %message_uuid,
                    error = %e,
                    "Handler failed, nacking"
                );
                self.settle(acker.as_ref(), &message_uuid, false).await;
            }
        }
    }

    async fn publish_produced(&self, produced: Vec<BusMessage>) -> Result<(), HandlerError> {
        if produced.is_empty() {
            return Ok(());
        }
        match &self.publish {
            Some((topic, publisher)) => Ok(publisher.publish(topic, produced).await?),
            None => Err(HandlerError::NoPublisher {
                handler: self.name.clone(),
                count: produced.len(),
            }),
        }
    }

    async fn settle(&self, acker: &dyn Acknowledger, message_uuid: &str, ack: bool) {
        let result = if ack { acker.ack().await } else { acker.nack().await };
        if let Err(e) = result {
            error!(
                handler = %self.name,
                message_uuid = %message_uuid,
                ack,
                error = %e,
                "Failed to settle message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler_fn, HandlerResult};
    use event_bus::InMemoryBus;

    fn noop() -> HandlerFunc {
        handler_fn(|_msg| async move { HandlerResult::Ok(Vec::new()) })
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {}",
                what
            );
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn start(router: Router) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let router = Arc::new(router);
        let running = router.running();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { router.run(shutdown).await.unwrap() }
        });
        running.wait().await;
        (shutdown, task)
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        router
            .add_no_publisher_handler("h", "topic", Arc::new(bus.subscriber("g")), noop())
            .unwrap();

        let err = router
            .add_no_publisher_handler("h", "other", Arc::new(bus.subscriber("g")), noop())
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateHandler(name) if name == "h"));
        assert_eq!(router.handler_names(), vec!["h"]);
    }

    #[test]
    fn test_invalid_topic_rejected() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        let err = router
            .add_no_publisher_handler("h", "", Arc::new(bus.subscriber("g")), noop())
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidTopic { .. }));

        let err = router
            .add_no_publisher_handler("", "topic", Arc::new(bus.subscriber("g")), noop())
            .unwrap_err();
        assert!(matches!(err, RouterError::EmptyHandlerName));
    }

    #[tokio::test]
    async fn test_running_signal_and_shutdown() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        router
            .add_no_publisher_handler("h", "topic", Arc::new(bus.subscriber("g")), noop())
            .unwrap();
        let router = Arc::new(router);
        let running = router.running();
        assert!(!running.is_running());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let router = router.clone();
            let shutdown = shutdown.clone();
            async move { router.run(shutdown).await }
        });

        running.wait().await;
        assert!(router.is_running());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_twice_rejected() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        router
            .add_no_publisher_handler("h", "topic", Arc::new(bus.subscriber("g")), noop())
            .unwrap();
        let router = Arc::new(router);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let router = router.clone();
            let shutdown = shutdown.clone();
            async move { router.run(shutdown).await }
        });
        router.running().wait().await;

        let second = router.run(CancellationToken::new()).await;
        assert!(matches!(second, Err(RouterError::AlreadyRunning)));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_produced_messages_go_to_publish_topic() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        router
            .add_handler(
                "forwarder",
                "orders",
                Arc::new(bus.subscriber("g")),
                "orders.audit",
                Arc::new(bus.clone()),
                handler_fn(|msg: BusMessage| async move {
                    HandlerResult::Ok(vec![BusMessage::new(msg.payload.clone())])
                }),
            )
            .unwrap();
        let (shutdown, task) = start(router).await;

        bus.publish("orders", vec![BusMessage::new(b"order-1".to_vec())])
            .await
            .unwrap();

        wait_until("produced message published", || {
            bus.published("orders.audit").len() == 1
        })
        .await;
        wait_until("source message acked", || bus.pending_count("orders", "g") == 0).await;
        assert_eq!(bus.published("orders.audit")[0].payload, b"order-1".to_vec());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_invalid_publish_topic_rejected() {
        let bus = InMemoryBus::new();
        let mut router = Router::new();
        let err = router
            .add_handler(
                "forwarder",
                "orders",
                Arc::new(bus.subscriber("g")),
                "orders audit",
                Arc::new(bus.clone()),
                noop(),
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidTopic { handler, .. } if handler == "forwarder"));
    }

    #[tokio::test]
    async fn test_no_publisher_handler_producing_messages_is_nacked() {
        let bus = InMemoryBus::new();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut router = Router::new();
        router
            .add_no_publisher_handler(
                "sink",
                "orders",
                Arc::new(bus.subscriber("g")),
                handler_fn(move |msg: BusMessage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { HandlerResult::Ok(vec![BusMessage::new(msg.payload.clone())]) }
                }),
            )
            .unwrap();
        let (shutdown, task) = start(router).await;

        bus.publish("orders", vec![BusMessage::new(b"order-2".to_vec())])
            .await
            .unwrap();

        // every delivery is nacked, so the same message keeps coming back
        wait_until("message redelivered", || attempts.load(Ordering::SeqCst) >= 3).await;
        assert_eq!(bus.published("orders").len(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }
}
