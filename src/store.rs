//! # Store Module
//!
//! The store boundary the engine consumes, plus an in-memory implementation.

use crate::model::{Document, DocumentId};
use crate::query::{Filter, Update};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures surfaced by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or failed the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// An optimistic write lost against a concurrent writer.
    #[error("version conflict on {collection}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        found: u64,
    },
    /// A stored document does not decode into the expected shape.
    #[error("malformed document {collection}/{id}: {source}")]
    Malformed {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("document {collection}/{id} already exists")]
    DuplicateId { collection: String, id: String },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Write accounting for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub documents: usize,
    pub writes: u64,
}

/// Abstract CRUD contract over named collections.
///
/// Implementations never retry internally.
pub trait DocumentStore {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError>;

    fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>, StoreError>;

    /// Apply `update` to one document.
    ///
    /// Returns `false` when the document does not exist. With
    /// `expected_version` set, a mismatching version fails with
    /// [`StoreError::VersionConflict`] and nothing is written.
    fn update_one(
        &mut self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError>;

    /// Apply `update` to every matching document; returns the number changed.
    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError>;

    fn insert_one(&mut self, collection: &str, document: Document)
        -> Result<DocumentId, StoreError>;

    fn metrics(&self) -> StoreMetrics;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }
}

/// In-memory document store.
///
/// Documents are kept ordered by id so scans are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    collections: HashMap<String, BTreeMap<DocumentId, Document>>,
    writes: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self, collection: &str) -> impl Iterator<Item = &Document> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.values())
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for Store {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .documents(collection)
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .documents(collection)
            .filter(|doc| filter.matches(doc))
            .count())
    }

    fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn update_one(
        &mut self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        let document = match self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        {
            Some(document) => document,
            None => return Ok(false),
        };
        if let Some(expected) = expected_version {
            if document.version != expected {
                return Err(StoreError::VersionConflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    expected,
                    found: document.version,
                });
            }
        }
        if update.apply(document) {
            document.version += 1;
            self.writes += 1;
        }
        Ok(true)
    }

    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError> {
        let docs = match self.collections.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };
        let mut changed = 0;
        for document in docs.values_mut().filter(|doc| filter.matches(doc)) {
            if update.apply(document) {
                document.version += 1;
                changed += 1;
            }
        }
        self.writes += changed as u64;
        Ok(changed)
    }

    fn insert_one(
        &mut self,
        collection: &str,
        mut document: Document,
    ) -> Result<DocumentId, StoreError> {
        let docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&document.id) {
            return Err(StoreError::DuplicateId {
                collection: collection.to_string(),
                id: document.id.to_string(),
            });
        }
        document.version = 1;
        let id = document.id.clone();
        docs.insert(id.clone(), document);
        self.writes += 1;
        Ok(id)
    }

    fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            documents: self.len(),
            writes: self.writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_store_creation() {
        let store = Store::new();
        assert!(store.is_empty());
        assert_eq!(store.metrics(), StoreMetrics::default());
    }

    #[test]
    fn test_insert_and_find() {
        let mut store = Store::new();
        store
            .insert_one("Posts", doc(json!({"_id": "p1", "userId": "a"})))
            .unwrap();
        store
            .insert_one("Posts", doc(json!({"_id": "p2", "userId": "b"})))
            .unwrap();

        let found = store.find("Posts", &Filter::new().eq("userId", "a")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "p1");
        assert_eq!(store.count("Posts", &Filter::new()).unwrap(), 2);
        assert_eq!(store.count("Comments", &Filter::new()).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut store = Store::new();
        store.insert_one("Posts", doc(json!({"_id": "p1"}))).unwrap();
        let err = store
            .insert_one("Posts", doc(json!({"_id": "p1"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    #[test]
    fn test_update_one_checks_version() {
        let mut store = Store::new();
        let id = store.insert_one("Posts", doc(json!({"_id": "p1"}))).unwrap();
        let update = Update::new().set("userId", "b");

        let err = store.update_one("Posts", &id, &update, Some(7)).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { found: 1, .. }));

        assert!(store.update_one("Posts", &id, &update, Some(1)).unwrap());
        assert_eq!(store.get("Posts", &id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_unchanged_update_is_not_a_write() {
        let mut store = Store::new();
        let id = store
            .insert_one("Posts", doc(json!({"_id": "p1", "userId": "a"})))
            .unwrap();
        let before = store.metrics().writes;
        store
            .update_one("Posts", &id, &Update::new().set("userId", "a"), None)
            .unwrap();
        assert_eq!(store.metrics().writes, before);
    }

    #[test]
    fn test_update_many_counts_changes() {
        let mut store = Store::new();
        for i in 0..3 {
            store
                .insert_one("Votes", doc(json!({"_id": format!("v{i}"), "userId": "a"})))
                .unwrap();
        }
        let changed = store
            .update_many(
                "Votes",
                &Filter::new().eq("userId", "a"),
                &Update::new().set("userId", "b"),
            )
            .unwrap();
        assert_eq!(changed, 3);
        assert_eq!(store.count("Votes", &Filter::new().eq("userId", "b")).unwrap(), 3);
    }
}
