//! In-memory implementation of the transport traits for testing and development

use crate::{
    validate_topic, Acknowledger, BusMessage, BusResult, Delivery, Publisher, Subscriber,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Transport implementation backed by in-process topic logs
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Component tests that need the real consumer-group semantics
///
/// Each topic is an append-only log. Every consumer group gets its own
/// cursor starting at the oldest message, so a message published before a
/// group first subscribes is still delivered to it. Nacked messages go to
/// the front of the group's redelivery queue.
///
/// # Example
/// ```rust
/// use event_bus::{BusMessage, InMemoryBus, Publisher, Subscriber};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// let mut stream = bus.subscriber("group-a").subscribe("test.topic").await?;
///
/// bus.publish("test.topic", vec![BusMessage::new(b"hello".to_vec())]).await?;
///
/// let delivery = stream.next().await.unwrap()?;
/// assert_eq!(delivery.message.payload, b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

struct Shared {
    topics: Mutex<HashMap<String, TopicState>>,
    // Bumped on every publish and nack to wake idle subscribers
    changed: watch::Sender<u64>,
}

#[derive(Default)]
struct TopicState {
    log: Vec<BusMessage>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    next_offset: usize,
    redeliver: VecDeque<BusMessage>,
    pending: HashSet<String>,
}

impl Shared {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicState>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn next_delivery(&self, topic: &str, group: &str) -> Option<BusMessage> {
        let mut topics = self.topics();
        let state = topics.entry(topic.to_string()).or_default();
        let TopicState { log, groups } = state;
        let group_state = groups.entry(group.to_string()).or_default();

        let message = match group_state.redeliver.pop_front() {
            Some(message) => message,
            None if group_state.next_offset < log.len() => {
                let message = log[group_state.next_offset].detached();
                group_state.next_offset += 1;
                message
            }
            None => return None,
        };

        group_state.pending.insert(message.uuid.clone());
        Some(message)
    }

    fn settle(&self, topic: &str, group: &str, message: &BusMessage, redeliver: bool) {
        {
            let mut topics = self.topics();
            let Some(group_state) = topics
                .get_mut(topic)
                .and_then(|state| state.groups.get_mut(group))
            else {
                return;
            };

            if !group_state.pending.remove(&message.uuid) {
                return;
            }

            if redeliver {
                group_state.redeliver.push_back(message.detached());
            }
        }

        if redeliver {
            self.notify();
        }
    }
}

impl InMemoryBus {
    /// Create a new, empty in-memory bus
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                changed,
            }),
        }
    }

    /// Build a subscriber bound to `consumer_group`
    pub fn subscriber(&self, consumer_group: impl Into<String>) -> InMemorySubscriber {
        InMemorySubscriber {
            bus: self.clone(),
            consumer_group: consumer_group.into(),
        }
    }

    /// Every message ever published to `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.shared
            .topics()
            .get(topic)
            .map(|state| state.log.iter().map(BusMessage::detached).collect())
            .unwrap_or_default()
    }

    /// Number of messages delivered to `consumer_group` but not yet acked
    pub fn pending_count(&self, topic: &str, consumer_group: &str) -> usize {
        self.shared
            .topics()
            .get(topic)
            .and_then(|state| state.groups.get(consumer_group))
            .map(|group| group.pending.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for InMemoryBus {
    async fn publish(&self, topic: &str, messages: Vec<BusMessage>) -> BusResult<()> {
        validate_topic(topic)?;

        {
            let mut topics = self.shared.topics();
            let state = topics.entry(topic.to_string()).or_default();
            state
                .log
                .extend(messages.iter().map(BusMessage::detached));
        }

        self.shared.notify();
        Ok(())
    }
}

/// Subscriber reading an [`InMemoryBus`] on behalf of one consumer group
#[derive(Clone)]
pub struct InMemorySubscriber {
    bus: InMemoryBus,
    consumer_group: String,
}

#[async_trait]
impl Subscriber for InMemorySubscriber {
    fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        validate_topic(topic)?;

        let shared = self.bus.shared.clone();
        let mut changed = shared.changed.subscribe();
        let topic = topic.to_string();
        let group = self.consumer_group.clone();

        let stream = async_stream::stream! {
            loop {
                // Mark the current version as seen before looking, so a
                // publish racing with the lookup still wakes us up.
                let _ = changed.borrow_and_update();

                if let Some(message) = shared.next_delivery(&topic, &group) {
                    let acker = InMemoryAcker {
                        shared: shared.clone(),
                        topic: topic.clone(),
                        group: group.clone(),
                        message: message.detached(),
                        settled: AtomicBool::new(false),
                    };
                    yield Ok(Delivery::new(message, acker));
                    continue;
                }

                if changed.changed().await.is_err() {
                    break;
                }
            }
        };

        Ok(stream.boxed())
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    message: BusMessage,
    settled: AtomicBool,
}

impl InMemoryAcker {
    fn settle(&self, redeliver: bool) {
        // A delivery is settled at most once
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared
            .settle(&self.topic, &self.group, &self.message, redeliver);
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> BusResult<()> {
        self.settle(false);
        Ok(())
    }

    async fn nack(&self) -> BusResult<()> {
        self.settle(true);
        Ok(())
    }
}
