//! Subscription types for live collection changes.

use crate::error::{Result, StoreError};
use crate::types::{Document, EventType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Payload delivered to subscribers after a committed mutation.
///
/// Serializes as `{"eventType": "INSERT", "new": {...}}`. For deletes, `new`
/// carries the document as it was before removal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    pub new: Document,
}

/// Which event types a binding receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFilter {
    /// `"*"`
    All,
    Only(EventType),
}

impl EventFilter {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(wanted) => *wanted == event_type,
        }
    }
}

impl From<EventType> for EventFilter {
    fn from(event_type: EventType) -> Self {
        EventFilter::Only(event_type)
    }
}

impl FromStr for EventFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            Ok(EventFilter::All)
        } else {
            s.parse().map(EventFilter::Only)
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::All => f.write_str("*"),
            EventFilter::Only(event_type) => event_type.fmt(f),
        }
    }
}

/// Callback invoked synchronously for each matching change.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Where a subscriber's events go.
#[derive(Clone)]
pub enum Sink {
    Callback(ChangeCallback),
    Queue(crossbeam_channel::Sender<ChangeEvent>),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Callback(_) => f.write_str("Sink::Callback"),
            Sink::Queue(_) => f.write_str("Sink::Queue"),
        }
    }
}

/// Unique identifier for a registered subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Lifecycle of a channel.
///
/// `Created → Subscribing → Subscribed → Unsubscribed`, never back out of
/// `Unsubscribed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Subscribing,
    Subscribed,
    Unsubscribed,
}
