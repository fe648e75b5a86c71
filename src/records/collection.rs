//! A named collection: in-memory documents backed by a collection log.

use super::log::{CollectionLog, LogEntry, WriteOp};
use crate::error::{Result, StoreError};
use crate::types::Document;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, error};

/// Guard serializing writers on one collection.
pub type WriteGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// One named collection of documents keyed by `id`.
///
/// Documents live in memory in primary-key order; every committed
/// transaction is appended to the collection log before it becomes visible.
pub struct Collection {
    name: String,

    /// Committed documents by primary key.
    documents: RwLock<BTreeMap<String, Document>>,

    /// Backing log.
    log: Mutex<CollectionLog>,

    /// Held for the full read-modify-write of a transaction. Re-entrant so a
    /// change listener may write to the same collection from its callback.
    write_lock: ReentrantMutex<()>,
}

impl Collection {
    /// Open a collection, replaying its log.
    pub fn open(name: &str, path: impl AsRef<Path>, sync_on_commit: bool) -> Result<Self> {
        let (log, entries) = CollectionLog::open(path, sync_on_commit)?;

        let mut documents = BTreeMap::new();
        for entry in entries {
            entry.apply(&mut documents)?;
        }

        debug!(collection = %name, documents = documents.len(), "opened collection");

        Ok(Self {
            name: name.to_string(),
            documents: RwLock::new(documents),
            log: Mutex::new(log),
            write_lock: ReentrantMutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // --- Primitives ---

    /// All documents in primary-key order.
    pub fn get_all(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.documents.read().len()
    }

    /// Store one document, replacing any document with the same id.
    pub fn put(&self, doc: Document) -> Result<()> {
        self.transaction(|tx| tx.put(doc))
    }

    /// Remove a document, returning it if it existed.
    pub fn delete(&self, id: &str) -> Result<Option<Document>> {
        self.transaction(|tx| Ok(tx.delete(id)))
    }

    // --- Transactions ---

    /// Block other writers on this collection until the guard is dropped.
    ///
    /// Transactions taken while holding the guard on the same thread do not
    /// block.
    pub fn lock_writes(&self) -> WriteGuard<'_> {
        self.write_lock.lock()
    }

    /// Run a read-modify-write transaction.
    ///
    /// Writes staged by `f` are committed as one log frame when it returns
    /// `Ok`; on `Err`, or if the log append fails, nothing is applied.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let _guard = self.write_lock.lock();

        let mut tx = Transaction {
            collection: self,
            ops: Vec::new(),
            staged: HashMap::new(),
        };
        let value = f(&mut tx)?;

        if tx.ops.is_empty() {
            return Ok(value);
        }

        let entry = LogEntry::Commit { ops: tx.ops };
        if let Err(e) = self.log.lock().append(&entry) {
            error!(collection = %self.name, error = %e, "transaction commit failed");
            return Err(StoreError::Transaction(e.to_string()));
        }

        entry.apply(&mut self.documents.write())?;
        Ok(value)
    }

    // --- Maintenance ---

    /// Rewrite the log as a single snapshot of the current documents.
    pub fn compact(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let documents = self.get_all();
        let count = documents.len();

        let mut log = self.log.lock();
        let before = log.size();
        log.rewrite(&LogEntry::Snapshot { documents })?;

        debug!(
            collection = %self.name,
            documents = count,
            before_bytes = before,
            after_bytes = log.size(),
            "compacted collection"
        );
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.log.lock().sync()
    }

    /// Log size in bytes.
    pub fn log_size(&self) -> u64 {
        self.log.lock().size()
    }
}

/// Staged writes against one collection.
///
/// Reads see the transaction's own writes first, then committed state.
pub struct Transaction<'a> {
    collection: &'a Collection,
    ops: Vec<WriteOp>,
    /// Latest staged value per id; `None` marks a staged delete.
    staged: HashMap<String, Option<Document>>,
}

impl Transaction<'_> {
    pub fn get(&self, id: &str) -> Option<Document> {
        match self.staged.get(id) {
            Some(staged) => staged.clone(),
            None => self.collection.get(id),
        }
    }

    /// Stage a put. The document must carry a string `id`.
    pub fn put(&mut self, doc: Document) -> Result<()> {
        let id = doc
            .id()
            .ok_or_else(|| StoreError::InvalidDocument("document has no string id".into()))?
            .to_string();

        self.staged.insert(id, Some(doc.clone()));
        self.ops.push(WriteOp::Put(doc));
        Ok(())
    }

    /// Stage a delete, returning the document as seen by this transaction.
    pub fn delete(&mut self, id: &str) -> Option<Document> {
        let existing = self.get(id);
        if existing.is_some() {
            self.staged.insert(id.to_string(), None);
            self.ops.push(WriteOp::Delete(id.to_string()));
        }
        existing
    }
}
