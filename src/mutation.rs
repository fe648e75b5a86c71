//! Insert, update and delete against one collection.
//!
//! Each call holds the collection's write lock across its transaction and
//! the resulting notifications, so concurrent writers to the same collection
//! never interleave. Callbacks that write to other collections nest those
//! locks; see [`Channel::on`](crate::subscriptions::Channel::on) for the
//! ordering constraint.

use crate::error::{Result, StoreError};
use crate::records::Collection;
use crate::subscriptions::SubscriptionManager;
use crate::types::{generate_id, now, Document, EventType, CREATED_AT_FIELD, ID_FIELD};
use serde_json::Value;
use tracing::{debug, warn};

/// Insert `docs` in one transaction and emit one `INSERT` per document, in
/// input order.
///
/// A missing, null or empty `id` gets a generated one; a missing or null
/// `created_at` gets the current time. An `id` of any other non-string kind
/// fails the whole call. A document whose id already exists is replaced.
pub fn insert(
    collection: &Collection,
    notifier: &SubscriptionManager,
    docs: Vec<Document>,
) -> Result<Vec<Document>> {
    let _guard = collection.lock_writes();

    let written = collection.transaction(|tx| {
        let mut written = Vec::with_capacity(docs.len());
        for mut doc in docs {
            match doc.get(ID_FIELD) {
                None | Some(Value::Null) => {
                    doc.insert(ID_FIELD, generate_id());
                }
                Some(Value::String(id)) if id.is_empty() => {
                    doc.insert(ID_FIELD, generate_id());
                }
                Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(StoreError::InvalidDocument(format!(
                        "id must be a string, got {other}"
                    )));
                }
            }
            if matches!(doc.get(CREATED_AT_FIELD), None | Some(Value::Null)) {
                doc.insert(CREATED_AT_FIELD, now());
            }

            tx.put(doc.clone())?;
            written.push(doc);
        }
        Ok(written)
    })?;

    debug!(collection = %collection.name(), count = written.len(), "inserted documents");

    for doc in &written {
        notifier.notify(collection.name(), EventType::Insert, doc);
    }
    Ok(written)
}

/// Shallow-merge `patch` over the document with `id` and emit one `UPDATE`.
///
/// Returns the merged document, or nothing if `id` does not exist. The
/// stored id is kept even if `patch` carries a different one. Without an id
/// this is a no-op: predicate-wide updates are not supported.
pub fn update(
    collection: &Collection,
    notifier: &SubscriptionManager,
    id: Option<&str>,
    patch: Document,
) -> Result<Vec<Document>> {
    let Some(id) = id else {
        warn!(
            collection = %collection.name(),
            "update without an id filter is not supported; nothing was updated"
        );
        return Ok(Vec::new());
    };

    let _guard = collection.lock_writes();

    let merged = collection.transaction(|tx| {
        let Some(mut existing) = tx.get(id) else {
            return Ok(None);
        };
        existing.merge(&patch);
        existing.insert(ID_FIELD, id);
        tx.put(existing.clone())?;
        Ok(Some(existing))
    })?;

    match merged {
        Some(doc) => {
            notifier.notify(collection.name(), EventType::Update, &doc);
            Ok(vec![doc])
        }
        None => {
            debug!(collection = %collection.name(), id, "update target not found");
            Ok(Vec::new())
        }
    }
}

/// Remove the document with `id` and emit one `DELETE` carrying it.
///
/// Deleting a missing id is a no-op. Without an id nothing is deleted.
pub fn delete(
    collection: &Collection,
    notifier: &SubscriptionManager,
    id: Option<&str>,
) -> Result<()> {
    let Some(id) = id else {
        warn!(
            collection = %collection.name(),
            "delete without an id filter is not supported; nothing was deleted"
        );
        return Ok(());
    };

    let _guard = collection.lock_writes();

    if let Some(removed) = collection.transaction(|tx| Ok(tx.delete(id)))? {
        notifier.notify(collection.name(), EventType::Delete, &removed);
    }
    Ok(())
}
