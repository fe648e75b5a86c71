//! Subscription manager for dispatching collection changes.

use crate::types::{Document, EventType};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

use super::types::{ChangeEvent, EventFilter, Sink, SubscriptionId};

/// Work scheduled to run after the caller's stack unwinds.
type Deferred = Box<dyn FnOnce() + Send>;

/// Internal subscription state.
struct Subscription {
    id: SubscriptionId,
    channel: String,
    collection: String,
    filter: EventFilter,
    sink: Sink,
}

impl Subscription {
    fn matches(&self, collection: &str, event_type: EventType) -> bool {
        self.collection == collection && self.filter.matches(event_type)
    }
}

/// Background thread running deferred work in submission order.
struct Dispatcher {
    sender: Option<Sender<Deferred>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Deferred>();
        let handle = thread::Builder::new()
            .name("portal-store-dispatch".to_string())
            .spawn(move || {
                for task in receiver {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("deferred subscription task panicked");
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the queue ends the loop once pending tasks have run.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Registry of subscribers and the dispatch routine run after each commit.
///
/// Subscribers are kept in registration order and invoked in that order.
pub struct SubscriptionManager {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    /// Spawned on first use.
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatcher: Mutex::new(None),
        }
    }

    /// Register a subscriber for one collection.
    pub fn register(
        &self,
        channel: &str,
        collection: &str,
        filter: EventFilter,
        sink: Sink,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.subscriptions.write().push(Subscription {
            id,
            channel: channel.to_string(),
            collection: collection.to_string(),
            filter,
            sink,
        });

        debug!(channel, collection, filter = %filter, id = id.0, "registered subscriber");
        id
    }

    /// Remove subscribers. Unknown ids are ignored. Returns how many were removed.
    pub fn remove(&self, ids: &[SubscriptionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|sub| !ids.contains(&sub.id));
        before - subs.len()
    }

    /// Number of registered subscribers.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of subscribers registered for `collection`.
    pub fn count_for(&self, collection: &str) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|sub| sub.collection == collection)
            .count()
    }

    /// Deliver a change to every matching subscriber, synchronously and in
    /// registration order.
    ///
    /// A panicking callback is logged and skipped; remaining subscribers still
    /// receive the event. Queue sinks whose receiver is gone are pruned.
    /// Returns the number of successful deliveries.
    pub fn notify(&self, collection: &str, event_type: EventType, document: &Document) -> usize {
        // Snapshot the targets so callbacks can (un)subscribe without deadlocking.
        let targets: Vec<(SubscriptionId, String, Sink)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| sub.matches(collection, event_type))
            .map(|sub| (sub.id, sub.channel.clone(), sub.sink.clone()))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let event = ChangeEvent {
            event_type,
            new: document.clone(),
        };

        let mut delivered = 0;
        let mut disconnected = Vec::new();

        for (id, channel, sink) in targets {
            match sink {
                Sink::Callback(callback) => {
                    match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                        Ok(()) => delivered += 1,
                        Err(_) => error!(
                            channel = %channel,
                            collection,
                            event = %event_type,
                            "subscriber callback panicked"
                        ),
                    }
                }
                Sink::Queue(sender) => {
                    if sender.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        disconnected.push(id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            let removed = self.remove(&disconnected);
            debug!(collection, removed, "pruned disconnected subscribers");
        }

        delivered
    }

    /// Run `task` on the dispatcher thread, never inline.
    ///
    /// If the dispatcher cannot be started the task is dropped and a warning
    /// logged.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_none() {
            match Dispatcher::spawn() {
                Ok(spawned) => *dispatcher = Some(spawned),
                Err(e) => {
                    warn!(error = %e, "failed to start subscription dispatcher");
                    return;
                }
            }
        }

        let sent = dispatcher
            .as_ref()
            .and_then(|d| d.sender.as_ref())
            .map(|sender| sender.send(Box::new(task)).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("subscription dispatcher is closed; dropping deferred task");
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
