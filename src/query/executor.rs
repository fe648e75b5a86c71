//! Read execution: filter, union, sort, paginate, count.

use super::filter::{Constraint, OrConstraint};
use crate::records::Collection;
use crate::types::Document;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Sort key and direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// Accumulated read request for one collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// AND constraints keyed by field; a later constraint on the same field
    /// replaces the earlier one.
    pub filters: BTreeMap<String, Constraint>,
    /// Alternatives from the last `or()` call.
    pub or_filters: Vec<OrConstraint>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
    pub head: bool,
    pub count: bool,
}

impl Query {
    fn matches_all(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, constraint)| constraint.matches(doc, field))
    }

    fn matches_any_or(&self, doc: &Document) -> bool {
        self.or_filters.iter().any(|constraint| constraint.matches(doc))
    }

    fn count_only(&self) -> bool {
        self.head && self.count
    }
}

/// Result of running a [`Query`].
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    Rows(Vec<Document>),
    /// Head+count request: number of matches before `limit`.
    Count(usize),
}

/// Run `query` against `collection`.
///
/// With OR constraints the result is the union of the two passes,
/// de-duplicated by id: AND matches first, then OR-only matches. A document
/// matched by both keeps its AND position and carries the version read by
/// the OR pass. With no AND constraints every document passes the AND pass,
/// so the OR alternatives cannot narrow the result.
pub fn execute(collection: &Collection, query: &Query) -> ReadOutcome {
    let mut rows: Vec<Document> = collection
        .get_all()
        .into_iter()
        .filter(|doc| query.matches_all(doc))
        .collect();

    if !query.or_filters.is_empty() {
        let alternatives = collection
            .get_all()
            .into_iter()
            .filter(|doc| query.matches_any_or(doc));
        rows = union_by_id(rows, alternatives);
    }

    if let Some(order) = &query.order {
        sort_rows(&mut rows, order);
    }

    let matched = rows.len();
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    if query.count_only() {
        ReadOutcome::Count(matched)
    } else {
        ReadOutcome::Rows(rows)
    }
}

fn union_by_id(base: Vec<Document>, extra: impl Iterator<Item = Document>) -> Vec<Document> {
    let mut rows = base;
    let mut positions: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| doc.id().map(|id| (id.to_string(), i)))
        .collect();

    for doc in extra {
        let existing = doc.id().and_then(|id| positions.get(id).copied());
        match existing {
            Some(i) => rows[i] = doc,
            None => {
                if let Some(id) = doc.id() {
                    positions.insert(id.to_string(), rows.len());
                }
                rows.push(doc);
            }
        }
    }

    rows
}

/// Stable sort on one field. Missing and null values sort after everything
/// else ascending, and therefore first descending.
pub fn sort_rows(rows: &mut [Document], order: &OrderBy) {
    rows.sort_by(|a, b| {
        let ord = compare_values(a.lookup(&order.field), b.lookup(&order.field));
        if order.ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

/// Natural ordering across JSON values. Values of different kinds order by
/// kind: booleans, numbers, strings, arrays, objects, then null/missing.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (None, None) => return Ordering::Equal,
        (None, Some(b)) => return rank(&Value::Null).cmp(&rank(b)),
        (Some(a), None) => return rank(a).cmp(&rank(&Value::Null)),
    };

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        // Lexical order; ISO-8601 timestamps sort chronologically.
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}
