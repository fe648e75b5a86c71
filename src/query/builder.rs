//! Chainable query builder bound to one collection.

use super::executor::{self, OrderBy, Query, ReadOutcome};
use super::filter::{parse_or, scalar_text, Constraint};
use super::response::{QueryResponse, WriteResponse};
use crate::mutation;
use crate::store::Store;
use crate::types::{Document, ID_FIELD};
use serde_json::Value;

/// Options for [`QueryBuilder::select_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectOptions {
    /// Skip the row payload.
    pub head: bool,
    /// Report the number of matching rows.
    pub count: bool,
}

/// Accumulates filters, ordering and pagination for one collection.
///
/// Every chain method consumes the builder and returns it; nothing touches
/// storage until a terminal call ([`execute`](Self::execute),
/// [`insert`](Self::insert), [`update`](Self::update),
/// [`delete`](Self::delete)). Terminal calls never fail outright: errors are
/// reported in the response.
#[derive(Clone)]
pub struct QueryBuilder<'s> {
    store: &'s Store,
    collection: String,
    query: Query,
    columns: Option<String>,
}

impl<'s> QueryBuilder<'s> {
    pub(crate) fn new(store: &'s Store, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            query: Query::default(),
            columns: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The projection hint recorded by `select`.
    pub fn columns(&self) -> Option<&str> {
        self.columns.as_deref()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    // --- Filters ---

    /// Require `field == value`. `relation.field` compares a field of a
    /// nested object; records without that object are excluded.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.query
            .filters
            .insert(field.to_string(), Constraint::Eq(value.into()));
        self
    }

    /// Require a case-insensitive substring match; `%` wildcards are ignored.
    pub fn ilike(mut self, field: &str, pattern: &str) -> Self {
        self.query
            .filters
            .insert(field.to_string(), Constraint::ilike(pattern));
        self
    }

    /// Constrain `field` to a list of values.
    ///
    /// Only the first value is used: the constraint is equality with
    /// `values[0]`, and an empty list adds nothing.
    pub fn in_<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        match values.into_iter().next() {
            Some(first) => self.eq(field, first),
            None => self,
        }
    }

    /// Add alternatives from a `field.operator.value[,...]` expression.
    ///
    /// The alternatives are unioned with the AND matches, so they only widen
    /// the result. Without any AND constraint every document already matches
    /// and `or` alone returns the whole collection; pair it with `eq` or
    /// `ilike` to search. Malformed triples are dropped silently. Replaces any
    /// earlier `or`.
    pub fn or(mut self, expr: &str) -> Self {
        self.query.or_filters = parse_or(expr);
        self
    }

    // --- Shaping ---

    /// Sort by one field. A later call replaces the earlier sort key.
    pub fn order(mut self, field: &str, ascending: bool) -> Self {
        self.query.order = Some(OrderBy {
            field: field.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    /// Same as `limit(1)`.
    pub fn maybe_single(self) -> Self {
        self.limit(1)
    }

    /// Record a projection hint. Rows are returned whole.
    pub fn select(self, columns: &str) -> Self {
        self.select_with(columns, SelectOptions::default())
    }

    /// Like [`select`](Self::select); `head` together with `count` turns the
    /// read into a count-only request.
    pub fn select_with(mut self, columns: &str, options: SelectOptions) -> Self {
        self.columns = Some(columns.to_string());
        self.query.head = options.head;
        self.query.count = options.count;
        self
    }

    // --- Terminal calls ---

    /// Run the read.
    pub fn execute(self) -> QueryResponse {
        match self.store.collection(&self.collection) {
            Ok(collection) => match executor::execute(&collection, &self.query) {
                ReadOutcome::Rows(rows) => QueryResponse::rows(rows),
                ReadOutcome::Count(n) => QueryResponse::count_only(n),
            },
            Err(e) => QueryResponse::failed(e),
        }
    }

    /// Insert documents in one transaction, filling in `id` and `created_at`
    /// when absent. Returns the stored documents.
    pub fn insert<I>(self, docs: I) -> WriteResponse
    where
        I: IntoIterator<Item = Document>,
    {
        let docs: Vec<Document> = docs.into_iter().collect();
        let result = self.store.collection(&self.collection).and_then(|collection| {
            mutation::insert(&collection, self.store.subscriptions(), docs)
        });
        WriteResponse::from_result(result.map(Some))
    }

    /// Shallow-merge `patch` into the document selected by `eq("id", ..)`.
    ///
    /// Without an `id` filter nothing is updated and the result is empty.
    pub fn update(self, patch: Document) -> WriteResponse {
        let id = self.id_filter();
        let result = self.store.collection(&self.collection).and_then(|collection| {
            mutation::update(&collection, self.store.subscriptions(), id.as_deref(), patch)
        });
        WriteResponse::from_result(result.map(Some))
    }

    /// Remove the document selected by `eq("id", ..)`.
    pub fn delete(self) -> WriteResponse {
        let id = self.id_filter();
        let result = self.store.collection(&self.collection).and_then(|collection| {
            mutation::delete(&collection, self.store.subscriptions(), id.as_deref())
        });
        WriteResponse::from_result(result.map(|_| None))
    }

    fn id_filter(&self) -> Option<String> {
        match self.query.filters.get(ID_FIELD) {
            Some(Constraint::Eq(value)) => scalar_text(value),
            _ => None,
        }
    }
}
