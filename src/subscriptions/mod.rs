//! Live change notifications for collections.
//!
//! After every committed insert, update or delete the store hands the
//! affected document to the [`SubscriptionManager`], which fans it out to
//! matching subscribers:
//! - synchronously, on the mutating thread
//! - in registration order
//! - with each callback isolated, so one panicking listener cannot starve
//!   the rest
//!
//! Subscribers are declared through named [`Channel`] handles.
//!
//! # Example
//!
//! ```ignore
//! let mut channel = store
//!     .channel("employee-dashboard")
//!     .on(EventFilter::All, "employees", |event| {
//!         println!("{} {:?}", event.event_type, event.new.id());
//!     });
//! channel.subscribe_with_ack(|state| println!("channel is {:?}", state));
//!
//! // ... later
//! channel.unsubscribe();
//! ```

mod channel;
mod manager;
mod types;

pub use channel::Channel;
pub use manager::SubscriptionManager;
pub use types::{ChangeCallback, ChangeEvent, ChannelState, EventFilter, Sink, SubscriptionId};
