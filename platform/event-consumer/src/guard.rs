//! Pre-decode checks applied to every message an event handler receives.

use event_bus::{BusMessage, TYPE_METADATA_KEY};
use std::collections::HashSet;

/// What to do with a message before it is decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Process,
    /// The uuid is on the poison list; ack without handling
    SkipPoison,
    /// The `type` metadata does not name the expected event; ack without handling
    SkipTypeMismatch { found: String },
}

/// Poison list and type filter shared by all event handlers
#[derive(Debug, Clone, Default)]
pub struct MessageGuard {
    poison_ids: HashSet<String>,
}

impl MessageGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poison_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            poison_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_poison(&self, uuid: &str) -> bool {
        self.poison_ids.contains(uuid)
    }

    /// Poison check first, then the type check
    ///
    /// A message without `type` metadata counts as a mismatch.
    pub fn check(&self, msg: &BusMessage, expected_type: &str) -> GuardDecision {
        if self.is_poison(&msg.uuid) {
            return GuardDecision::SkipPoison;
        }

        let found = msg.metadata.get(TYPE_METADATA_KEY);
        if found != expected_type {
            return GuardDecision::SkipTypeMismatch {
                found: found.to_string(),
            };
        }

        GuardDecision::Process
    }
}
