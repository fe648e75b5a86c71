//! Named subscription handles.

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::manager::SubscriptionManager;
use super::types::{ChangeEvent, ChannelState, EventFilter, Sink, SubscriptionId};

/// A binding declared before the channel is subscribed.
struct Binding {
    collection: String,
    filter: EventFilter,
    sink: Sink,
}

/// A named handle grouping change bindings.
///
/// Bindings declared with [`Channel::on`] or [`Channel::listen`] start
/// receiving events once [`Channel::subscribe`] is called, and stop after
/// [`Channel::unsubscribe`]. Dropping a channel does not unsubscribe it.
pub struct Channel {
    name: String,
    manager: Arc<SubscriptionManager>,
    pending: Vec<Binding>,
    registered: Vec<SubscriptionId>,
    state: Arc<Mutex<ChannelState>>,
}

impl Channel {
    pub(crate) fn new(name: &str, manager: Arc<SubscriptionManager>) -> Self {
        Self {
            name: name.to_string(),
            manager,
            pending: Vec::new(),
            registered: Vec::new(),
            state: Arc::new(Mutex::new(ChannelState::Created)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Attach a callback for `filter` events on `collection`.
    ///
    /// The callback runs on the writing thread while that thread still holds
    /// `collection`'s write lock. Writing back to the same collection from
    /// the callback is fine. Writing to a different collection takes that
    /// collection's lock too, so two threads whose callbacks write across
    /// each other's collections (X to Y and Y to X) can deadlock. Keep
    /// cross-collection writes flowing in one direction, or hand them to
    /// another thread through [`Channel::listen`].
    pub fn on<F>(mut self, filter: EventFilter, collection: &str, callback: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.bind(collection, filter, Sink::Callback(Arc::new(callback)));
        self
    }

    /// Attach a queue for `filter` events on `collection`, returning its
    /// receiving end. Dropping the receiver detaches the queue.
    pub fn listen(&mut self, filter: EventFilter, collection: &str) -> Receiver<ChangeEvent> {
        let (sender, receiver) = unbounded();
        self.bind(collection, filter, Sink::Queue(sender));
        receiver
    }

    /// Activate every binding. The acknowledgement is skipped; see
    /// [`Channel::subscribe_with_ack`].
    pub fn subscribe(&mut self) {
        self.subscribe_with_ack(|_| {});
    }

    /// Activate every binding and schedule `ack` on the dispatcher thread.
    ///
    /// `ack` receives the channel state at the time it runs: `Subscribed`,
    /// or `Unsubscribed` if the channel was torn down first. It is never run
    /// inline. Subscribing twice is a no-op.
    pub fn subscribe_with_ack<A>(&mut self, ack: A)
    where
        A: FnOnce(ChannelState) + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Created {
                warn!(channel = %self.name, state = ?*state, "channel already subscribed");
                return;
            }
            *state = ChannelState::Subscribing;
        }

        for binding in std::mem::take(&mut self.pending) {
            let id = self.manager.register(
                &self.name,
                &binding.collection,
                binding.filter,
                binding.sink,
            );
            self.registered.push(id);
        }

        let state = Arc::clone(&self.state);
        self.manager.defer(move || {
            let current = {
                let mut state = state.lock();
                if *state == ChannelState::Subscribing {
                    *state = ChannelState::Subscribed;
                }
                *state
            };
            ack(current);
        });

        debug!(channel = %self.name, bindings = self.registered.len(), "channel subscribing");
    }

    /// Detach every binding registered through this channel.
    ///
    /// No-op on a channel that was never subscribed or is already
    /// unsubscribed.
    pub fn unsubscribe(&mut self) {
        {
            let mut state = self.state.lock();
            match *state {
                ChannelState::Created | ChannelState::Unsubscribed => return,
                ChannelState::Subscribing | ChannelState::Subscribed => {
                    *state = ChannelState::Unsubscribed;
                }
            }
        }

        let removed = self.manager.remove(&self.registered);
        self.registered.clear();
        debug!(channel = %self.name, removed, "channel unsubscribed");
    }

    fn bind(&mut self, collection: &str, filter: EventFilter, sink: Sink) {
        match self.state() {
            ChannelState::Created => self.pending.push(Binding {
                collection: collection.to_string(),
                filter,
                sink,
            }),
            ChannelState::Subscribing | ChannelState::Subscribed => {
                let id = self.manager.register(&self.name, collection, filter, sink);
                self.registered.push(id);
            }
            ChannelState::Unsubscribed => {
                warn!(
                    channel = %self.name,
                    collection,
                    "ignoring binding on an unsubscribed channel"
                );
            }
        }
    }
}
