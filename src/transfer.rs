//! # Ownership Transfer
//!
//! Rewrites owner references in one collection from a source identity to a
//! target identity, including rich-content fields and their revision history.

use crate::model::{IdentityId, REVISIONS};
use crate::query::{Filter, Update};
use crate::store::{DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// A collection registered for ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Field holding the owner id.
    #[serde(default = "default_owner_field")]
    pub owner_field: String,
    /// Rich-content fields carrying a denormalized `userId` and a revision history.
    #[serde(default)]
    pub editable_fields: Vec<String>,
}

fn default_owner_field() -> String {
    "userId".to_string()
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_field: default_owner_field(),
            editable_fields: Vec::new(),
        }
    }

    pub fn with_owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field = field.into();
        self
    }

    pub fn with_editable_fields(mut self, fields: &[&str]) -> Self {
        self.editable_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn owned_by(&self, id: &IdentityId) -> Filter {
        Filter::new().eq(self.owner_field.as_str(), id)
    }
}

/// A record whose rewrite failed; the rest of the collection was still processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub document_id: String,
    pub error: String,
}

/// Counts gathered around a transfer, for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub collection: String,
    pub source_count_before: usize,
    pub target_count_before: usize,
    /// `None` in dry-run mode.
    pub target_count_after: Option<usize>,
    pub transferred: usize,
    pub revisions_rewritten: usize,
    pub failures: Vec<RecordFailure>,
}

impl TransferReport {
    /// Whether the target now owns exactly what both identities owned before.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self.target_count_after
                == Some(self.source_count_before + self.target_count_before)
    }
}

/// Transfer every record of `spec.name` owned by `source` to `target`.
///
/// Failures to enumerate the collection abort it and are returned. A failure
/// on a single record is captured in the report and the remaining records
/// are still rewritten.
#[instrument(skip(store, spec), fields(collection = %spec.name), level = "debug")]
pub fn transfer_ownership(
    store: &mut dyn DocumentStore,
    spec: &CollectionSpec,
    source: &IdentityId,
    target: &IdentityId,
    dry_run: bool,
) -> Result<TransferReport, StoreError> {
    let source_count_before = store.count(&spec.name, &spec.owned_by(source))?;
    let target_count_before = store.count(&spec.name, &spec.owned_by(target))?;
    info!(
        collection = %spec.name,
        %source,
        %target,
        source_count = source_count_before,
        target_count = target_count_before,
        "counted owned records"
    );

    let mut report = TransferReport {
        collection: spec.name.clone(),
        source_count_before,
        target_count_before,
        target_count_after: None,
        transferred: 0,
        revisions_rewritten: 0,
        failures: Vec::new(),
    };
    if dry_run {
        return Ok(report);
    }

    let documents = store.find(&spec.name, &spec.owned_by(source))?;
    info!(collection = %spec.name, documents = documents.len(), "transferring documents");
    for document in documents {
        match transfer_document(store, spec, &document.id, source, target) {
            Ok(revisions) => {
                report.transferred += 1;
                report.revisions_rewritten += revisions;
            }
            Err(err) => {
                warn!(
                    collection = %spec.name,
                    document = %document.id,
                    error = %err,
                    "failed to transfer document"
                );
                report.failures.push(RecordFailure {
                    document_id: document.id.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    let target_count_after = store.count(&spec.name, &spec.owned_by(target))?;
    info!(
        collection = %spec.name,
        target_count_after,
        expected = source_count_before + target_count_before,
        "final target count"
    );
    report.target_count_after = Some(target_count_after);
    Ok(report)
}

fn transfer_document(
    store: &mut dyn DocumentStore,
    spec: &CollectionSpec,
    id: &crate::model::DocumentId,
    source: &IdentityId,
    target: &IdentityId,
) -> Result<usize, StoreError> {
    store.update_one(
        &spec.name,
        id,
        &Update::new().set(spec.owner_field.as_str(), target),
        None,
    )?;

    let mut revisions = 0;
    for field in &spec.editable_fields {
        let present = store
            .get(&spec.name, id)?
            .is_some_and(|doc| doc.get_path(field).is_some_and(|v| v.is_object()));
        if present {
            store.update_one(
                &spec.name,
                id,
                &Update::new().set(format!("{field}.userId"), target),
                None,
            )?;
        }
        revisions += store.update_many(
            REVISIONS,
            &Filter::new()
                .eq("documentId", id)
                .eq("userId", source)
                .eq("fieldName", field.as_str()),
            &Update::new().set("userId", target),
        )?;
    }
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::store::Store;
    use serde_json::json;

    fn seed_posts(store: &mut Store, owner: &str, ids: &[&str]) {
        for id in ids {
            store
                .insert_one(
                    "Posts",
                    Document::from_value(json!({
                        "_id": id,
                        "userId": owner,
                        "contents": {"html": "<p>hi</p>", "userId": owner},
                    }))
                    .unwrap(),
                )
                .unwrap();
        }
    }

    #[test]
    fn dry_run_only_counts() {
        let mut store = Store::new();
        seed_posts(&mut store, "a", &["p1", "p2"]);
        let snapshot = store.clone();

        let report = transfer_ownership(
            &mut store,
            &CollectionSpec::new("Posts"),
            &IdentityId::new("a"),
            &IdentityId::new("b"),
            true,
        )
        .unwrap();

        assert_eq!(report.source_count_before, 2);
        assert_eq!(report.target_count_after, None);
        assert_eq!(store, snapshot);
    }

    #[test]
    fn transfer_rewrites_content_and_revisions() {
        let mut store = Store::new();
        seed_posts(&mut store, "a", &["p1"]);
        store
            .insert_one(
                REVISIONS,
                Document::from_value(json!({
                    "_id": "r1", "documentId": "p1", "fieldName": "contents", "userId": "a"
                }))
                .unwrap(),
            )
            .unwrap();
        store
            .insert_one(
                REVISIONS,
                Document::from_value(json!({
                    "_id": "r2", "documentId": "p1", "fieldName": "contents", "userId": "editor"
                }))
                .unwrap(),
            )
            .unwrap();

        let spec = CollectionSpec::new("Posts").with_editable_fields(&["contents"]);
        let report = transfer_ownership(
            &mut store,
            &spec,
            &IdentityId::new("a"),
            &IdentityId::new("b"),
            false,
        )
        .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.revisions_rewritten, 1);
        let post = store.get("Posts", &"p1".into()).unwrap().unwrap();
        assert_eq!(post.get_path("contents.userId"), Some(&json!("b")));
        let untouched = store.get(REVISIONS, &"r2".into()).unwrap().unwrap();
        assert_eq!(untouched.body["userId"], json!("editor"));
    }

    #[test]
    fn missing_rich_content_field_is_not_created() {
        let mut store = Store::new();
        store
            .insert_one(
                "Comments",
                Document::from_value(json!({"_id": "c1", "userId": "a"})).unwrap(),
            )
            .unwrap();
        let spec = CollectionSpec::new("Comments").with_editable_fields(&["contents"]);
        transfer_ownership(
            &mut store,
            &spec,
            &IdentityId::new("a"),
            &IdentityId::new("b"),
            false,
        )
        .unwrap();
        let comment = store.get("Comments", &"c1".into()).unwrap().unwrap();
        assert!(comment.get_path("contents").is_none());
    }

    #[test]
    fn custom_owner_field_is_rewritten() {
        let mut store = Store::new();
        store
            .insert_one(
                "Localgroups",
                Document::from_value(json!({"_id": "g1", "organizerId": "a", "userId": "c"}))
                    .unwrap(),
            )
            .unwrap();
        let spec = CollectionSpec::new("Localgroups").with_owner_field("organizerId");

        let report = transfer_ownership(
            &mut store,
            &spec,
            &IdentityId::new("a"),
            &IdentityId::new("b"),
            false,
        )
        .unwrap();

        assert_eq!(report.source_count_before, 1);
        assert_eq!(report.target_count_after, Some(1));
        let group = store.get("Localgroups", &"g1".into()).unwrap().unwrap();
        assert_eq!(group.body["organizerId"], json!("b"));
        assert_eq!(group.body["userId"], json!("c"));
    }
}
