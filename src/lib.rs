//! # Portal Store
//!
//! An embedded document store for schemaless JSON records, organized into
//! named collections, with a chainable query builder and live change
//! notifications.
//!
//! ## Core Concepts
//!
//! - **Collections**: Documents keyed by a string `id`, persisted to a
//!   checksummed append-only log and replayed on open
//! - **Queries**: Equality, case-insensitive substring and OR-group filters,
//!   single-key ordering, limits and counts
//! - **Mutations**: Transactional insert, shallow-merge update and delete
//! - **Channels**: Named subscription handles receiving `INSERT`, `UPDATE`
//!   and `DELETE` events after each commit
//!
//! ## Example
//!
//! ```ignore
//! use portal_store::{Document, EventFilter, Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::open(
//!     StoreConfig::new("./portal-data").with_collections(["employees"]),
//! )?;
//!
//! let mut channel = store
//!     .channel("dashboard")
//!     .on(EventFilter::All, "employees", |event| println!("{:?}", event));
//! channel.subscribe();
//!
//! store
//!     .from("employees")
//!     .insert([Document::from_value(json!({"name": "Alice"}))?])
//!     .into_result()?;
//!
//! let rows = store
//!     .from("employees")
//!     .eq("active", true)
//!     .or("name.ilike.%ali%")
//!     .order("created_at", false)
//!     .execute()
//!     .into_result()?;
//! ```

pub mod error;
pub mod mutation;
pub mod query;
pub mod records;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use query::{QueryBuilder, QueryResponse, SelectOptions, WriteResponse};
pub use records::{Collection, Transaction};
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    ChangeCallback, ChangeEvent, Channel, ChannelState, EventFilter, SubscriptionId,
    SubscriptionManager,
};
pub use types::*;
