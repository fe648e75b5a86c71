//! Filter constraints and the `or()` filter-string parser.

use crate::types::Document;
use serde_json::Value;
use tracing::debug;

/// One AND constraint on a field.
#[derive(Clone, Debug, PartialEq)]
pub enum Constraint {
    /// Field equals the value. Numbers compare numerically.
    Eq(Value),
    /// Field's text contains the needle, case-insensitively. Stored
    /// lower-cased with `%` wildcards removed.
    ILike(String),
}

impl Constraint {
    /// Build an `ilike` constraint from a SQL-style pattern such as `%ali%`.
    pub fn ilike(pattern: &str) -> Self {
        Constraint::ILike(normalize_pattern(pattern))
    }

    /// Whether `doc` satisfies this constraint on `field`. Dotted keys
    /// (`relation.field`) look one level into a nested object.
    pub fn matches(&self, doc: &Document, field: &str) -> bool {
        let Some(actual) = doc.lookup(field) else {
            return false;
        };

        match self {
            Constraint::Eq(expected) => values_equal(actual, expected),
            Constraint::ILike(needle) => scalar_text(actual)
                .map(|text| text.to_lowercase().contains(needle.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Operator of an `or()` triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrOperator {
    ILike,
    /// Any other operator name; compared as equality.
    Equals(String),
}

/// One `field.operator.value` alternative.
#[derive(Clone, Debug, PartialEq)]
pub struct OrConstraint {
    pub field: String,
    pub operator: OrOperator,
    pub value: String,
}

impl OrConstraint {
    /// Textual fields match on case-insensitive substring, anything else on
    /// equality with the value's text form.
    pub fn matches(&self, doc: &Document) -> bool {
        match doc.lookup(&self.field) {
            Some(Value::String(text)) => text
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
            Some(other) => scalar_text(other)
                .map(|text| text == self.value)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Parse `field.operator.value[,field.operator.value...]`.
///
/// Triples with an empty part are dropped. The value keeps any further dots,
/// so `email.eq.a.b@corp.com` compares against `a.b@corp.com`.
pub fn parse_or(expr: &str) -> Vec<OrConstraint> {
    let mut constraints = Vec::new();

    for part in expr.split(',') {
        let part = part.trim();
        let mut pieces = part.splitn(3, '.');
        let (field, operator, value) = match (pieces.next(), pieces.next(), pieces.next()) {
            (Some(f), Some(o), Some(v)) if !f.is_empty() && !o.is_empty() && !v.is_empty() => {
                (f, o, v)
            }
            _ => {
                debug!(triple = part, "dropping malformed or() triple");
                continue;
            }
        };

        let (operator, value) = if operator == "ilike" {
            (OrOperator::ILike, normalize_pattern(value))
        } else {
            (OrOperator::Equals(operator.to_string()), value.to_string())
        };

        constraints.push(OrConstraint {
            field: field.to_string(),
            operator,
            value,
        });
    }

    constraints
}

fn normalize_pattern(pattern: &str) -> String {
    pattern.replace('%', "").to_lowercase()
}

/// Equality with numeric normalization (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Text form of a scalar value; `None` for arrays and objects.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
