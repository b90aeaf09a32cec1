//! Wires the message router and the HTTP ingress into one runnable service.

use crate::bus::{consumer_group, Bus};
use crate::clients::{ReceiptsService, SpreadsheetsService};
use crate::handlers::{message_guard, TicketHandlers};
use crate::http::{self, AppState};
use event_bus::consumer_retry::{RetryConfig, RetryConfigError};
use event_bus::{BusError, Subscriber};
use event_consumer::{
    default_middlewares, CorrelationPublisher, EventProcessor, EventProcessorConfig,
    EventPublisher, ProcessorError, Router, RouterError, SubscriberParams,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid retry policy: {0}")]
    Retry(#[from] RetryConfigError),

    #[error("failed to register handlers: {0}")]
    Wiring(#[from] ProcessorError),

    #[error("message router failed: {0}")]
    Router(#[from] RouterError),

    #[error("HTTP server failed: {0}")]
    Http(#[from] std::io::Error),
}

/// Everything the service needs from the outside world
pub struct ServiceDeps {
    pub bus: Bus,
    pub receipts: Arc<dyn ReceiptsService>,
    pub spreadsheets: Arc<dyn SpreadsheetsService>,
    pub retry: RetryConfig,
    pub consumer_group_prefix: String,
}

pub struct Service {
    router: Arc<Router>,
    app: axum::Router,
}

impl Service {
    pub fn new(deps: ServiceDeps) -> Result<Self, ServiceError> {
        let ServiceDeps {
            bus,
            receipts,
            spreadsheets,
            retry,
            consumer_group_prefix,
        } = deps;

        let events = EventPublisher::new(Arc::new(CorrelationPublisher::new(bus.publisher())));

        let mut router = Router::new();
        for middleware in default_middlewares(retry)? {
            router.add_middleware(middleware);
        }

        let subscriber_bus = bus.clone();
        let config = EventProcessorConfig {
            subscriber_constructor: Arc::new(move |params: SubscriberParams<'_>| {
                let subscriber: Arc<dyn Subscriber> = subscriber_bus
                    .subscriber(consumer_group(&consumer_group_prefix, params.handler_name));
                Ok::<_, BusError>(subscriber)
            }),
            guard: message_guard(),
            publisher: Some(events.clone()),
        };

        let handlers = TicketHandlers::new(receipts, spreadsheets);
        EventProcessor::new(&mut router, config).add_handlers(handlers.event_handlers())?;

        let app = http::router(AppState { events });

        Ok(Self {
            router: Arc::new(router),
            app,
        })
    }

    /// Run until `shutdown` is cancelled or either half fails
    ///
    /// The HTTP server accepts connections only after the router is running,
    /// so the service never reports healthy before it can consume. A failure
    /// of either half cancels the other.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError> {
        let Service { router, app } = self;

        let router_half = {
            let router = router.clone();
            let shutdown = shutdown.clone();
            async move {
                let result = router.run(shutdown.clone()).await;
                if let Err(e) = &result {
                    error!(error = %e, "Message router stopped with error");
                    shutdown.cancel();
                }
                result.map_err(ServiceError::from)
            }
        };

        let http_half = {
            let running = router.running();
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = running.wait() => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }

                info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
                let graceful = shutdown.clone();
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { graceful.cancelled().await })
                    .await;
                if let Err(e) = &result {
                    error!(error = %e, "HTTP server stopped with error");
                    shutdown.cancel();
                }
                result.map_err(ServiceError::from)
            }
        };

        let (router_result, http_result) = tokio::join!(router_half, http_half);
        router_result?;
        http_result?;

        info!("Service stopped");
        Ok(())
    }
}
