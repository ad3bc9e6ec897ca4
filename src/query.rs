//! # Query Module
//!
//! Filters and updates understood by every [`DocumentStore`](crate::store::DocumentStore).
//!
//! Matching follows document-database conventions: an equality predicate on an
//! array field matches when any element is equal, and a negated predicate
//! matches documents where the field is absent.

use crate::model::{get_path, set_path, Document};
use serde_json::{Map, Value};

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    /// Field equals the value, or the array field contains it.
    Eq(String, Value),
    /// Negation of `Eq`; absent fields match.
    Ne(String, Value),
}

impl Predicate {
    fn matches(&self, body: &Map<String, Value>) -> bool {
        match self {
            Predicate::Eq(path, expected) => value_matches(get_path(body, path), expected),
            Predicate::Ne(path, expected) => !value_matches(get_path(body, path), expected),
        }
    }
}

fn value_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(value) => value == expected,
    }
}

/// Conjunction of predicates. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(path.into(), value.into()));
        self
    }

    pub fn ne(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Ne(path.into(), value.into()));
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(&document.body))
    }
}

/// Field overwrites applied to a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    sets: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((path.into(), value.into()));
        self
    }

    /// Apply the update. Returns whether any field actually changed.
    ///
    /// `_id` is never overwritten.
    pub fn apply(&self, document: &mut Document) -> bool {
        let mut changed = false;
        for (path, value) in &self.sets {
            if path == "_id" {
                continue;
            }
            if get_path(&document.body, path) != Some(value) {
                set_path(&mut document.body, path, value.clone());
                changed = true;
            }
        }
        changed
    }
}
