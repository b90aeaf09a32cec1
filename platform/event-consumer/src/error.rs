use event_bus::BusError;

/// Failure of one message passing through a handler chain
///
/// Any `Err` returned to the router results in a nack, so every variant is
/// treated as retriable by the transport.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("handler '{handler}' produced {count} message(s) but has no publisher")]
    NoPublisher { handler: String, count: usize },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// Errors raised while registering handlers or running the router
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("handler name cannot be empty")]
    EmptyHandlerName,

    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("handler '{handler}' has an invalid topic: {source}")]
    InvalidTopic {
        handler: String,
        #[source]
        source: BusError,
    },

    #[error("router is already running")]
    AlreadyRunning,

    #[error("handler '{handler}' failed to subscribe to '{topic}': {source}")]
    Subscribe {
        handler: String,
        topic: String,
        #[source]
        source: BusError,
    },

    #[error("consume loop terminated abnormally: {0}")]
    LoopPanicked(String),
}

/// Errors raised when publishing a typed event
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode event '{event}': {source}")]
    Marshal {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors raised while registering event handlers with the processor
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("failed to build subscriber for handler '{handler}': {source}")]
    Subscriber {
        handler: String,
        #[source]
        source: BusError,
    },

    #[error("producer handler '{0}' requires an event publisher")]
    MissingPublisher(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}
