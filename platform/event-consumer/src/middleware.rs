//! # Handler Middleware
//!
//! A middleware takes a [`HandlerFunc`] and returns a new one that wraps it.
//! The router applies its middlewares in registration order, so the first
//! one registered is the outermost layer of every handler.
//!
//! The standard stack, from outermost to innermost:
//!
//! 1. [`Recoverer`]: turns a panic anywhere below it into a [`HandlerError`]
//! 2. [`Retry`]: re-runs the rest of the chain with exponential backoff
//! 3. [`CorrelationId`]: attaches a correlation id to the processing context
//! 4. [`Logging`]: logs every attempt and every error
//!
//! Recovery sits outside retry, so a panicking handler is nacked instead of
//! being retried in-process.

use crate::error::HandlerError;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig, RetryConfigError};
use event_bus::{BusMessage, CORRELATION_ID_METADATA_KEY};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Outcome of handling one message: the messages it produced, or an error
pub type HandlerResult = Result<Vec<BusMessage>, HandlerError>;

/// Type-erased message handler
pub type HandlerFunc = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Lift an async function into a [`HandlerFunc`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFunc
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |msg| f(msg).boxed())
}

/// Wraps a handler with cross-cutting behavior
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc;
}

impl<F> Middleware for F
where
    F: Fn(HandlerFunc) -> HandlerFunc + Send + Sync,
{
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc {
        self(next)
    }
}

/// Compose `middlewares` around `handler`, first element outermost
pub fn apply_middlewares(middlewares: &[Arc<dyn Middleware>], handler: HandlerFunc) -> HandlerFunc {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}

/// The standard middleware stack in its required order
///
/// Fails when `retry` is not a usable backoff policy.
pub fn default_middlewares(
    retry: RetryConfig,
) -> Result<Vec<Arc<dyn Middleware>>, RetryConfigError> {
    Ok(vec![
        Arc::new(Recoverer),
        Arc::new(Retry::new(retry)?),
        Arc::new(CorrelationId),
        Arc::new(Logging),
    ])
}

/// Converts panics raised by the wrapped handler into errors
#[derive(Debug, Clone, Copy, Default)]
pub struct Recoverer;

impl Middleware for Recoverer {
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc {
        Arc::new(move |msg: BusMessage| {
            let next = next.clone();
            async move {
                let message_uuid = msg.uuid.clone();
                // next(msg) may itself panic before returning a future
                let outcome = AssertUnwindSafe(async move { next(msg).await })
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(&*panic);
                        error!(
                            message_uuid = %message_uuid,
                            panic = %reason,
                            "Recovered from panic in message handler"
                        );
                        Err(HandlerError::Panic(reason))
                    }
                }
            }
            .boxed()
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Re-runs the wrapped handler with exponential backoff until it succeeds
/// or the configured number of retries is exhausted
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Middleware for Retry {
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc {
        let config = self.config.clone();
        Arc::new(move |msg: BusMessage| {
            let next = next.clone();
            let config = config.clone();
            async move {
                let context = msg
                    .context
                    .handler_name()
                    .unwrap_or("handler")
                    .to_string();
                retry_with_backoff(|| next(msg.clone()), &config, &context).await
            }
            .boxed()
        })
    }
}

/// Ensures every message is handled under a correlation id
///
/// The id is taken from the `correlation_id` metadata entry, then from the
/// processing context, and generated as `gen_<uuid>` when neither has one.
/// The rest of the chain runs inside a span carrying the id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationId;

impl Middleware for CorrelationId {
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc {
        Arc::new(move |mut msg: BusMessage| {
            let correlation_id = match msg.metadata.get(CORRELATION_ID_METADATA_KEY) {
                "" => msg
                    .context
                    .correlation_id()
                    .map(str::to_string)
                    .unwrap_or_else(new_correlation_id),
                id => id.to_string(),
            };

            let span = tracing::info_span!(
                "message",
                correlation_id = %correlation_id,
                message_uuid = %msg.uuid,
            );
            msg.context = msg.context.clone().with_correlation_id(correlation_id);

            next(msg).instrument(span).boxed()
        })
    }
}

/// Correlation id for messages that arrive without one
pub fn new_correlation_id() -> String {
    format!("gen_{}", Uuid::new_v4().simple())
}

/// Logs the start of every handling attempt and any error it returns
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging;

impl Middleware for Logging {
    fn wrap(&self, next: HandlerFunc) -> HandlerFunc {
        Arc::new(move |msg: BusMessage| {
            let next = next.clone();
            async move {
                let message_uuid = msg.uuid.clone();
                info!(message_uuid = %message_uuid, "Handling a message");

                let result = next(msg).await;
                if let Err(e) = &result {
                    error!(
                        message_uuid = %message_uuid,
                        error = %e,
                        "Message handling error"
                    );
                }
                result
            }
            .boxed()
        })
    }
}
