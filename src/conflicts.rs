//! # Conflicts Module
//!
//! Collapses per-(user, resource) state of two identities into a single record
//! owned by the target. The most recently updated record wins.

use crate::model::{Document, IdentityId, ReadStatus, READ_STATUSES};
use crate::query::{Filter, Update};
use crate::store::{DocumentStore, StoreError};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

/// The resource a read state is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceSelector {
    Post(String),
    Tag(String),
}

impl ResourceSelector {
    fn field(&self) -> &'static str {
        match self {
            ResourceSelector::Post(_) => "postId",
            ResourceSelector::Tag(_) => "tagId",
        }
    }

    fn value(&self) -> &str {
        match self {
            ResourceSelector::Post(id) | ResourceSelector::Tag(id) => id,
        }
    }

    fn filter_for(&self, user: &IdentityId) -> Filter {
        Filter::new()
            .eq("userId", user)
            .eq(self.field(), self.value())
    }
}

/// What a merge did to the target's state for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Neither identity had state.
    Absent,
    /// The target already holds the winning state.
    Unchanged,
    /// Newer source state was written onto the target's record.
    Overwritten,
    /// Source state was copied into a fresh record owned by the target.
    Copied,
}

/// Merge the source's state for `selector` into the target's.
///
/// Idempotent: a second run finds the target already holding the winning
/// values and writes nothing.
pub fn merge_resource_state(
    store: &mut dyn DocumentStore,
    source: &IdentityId,
    target: &IdentityId,
    selector: &ResourceSelector,
) -> Result<Resolution, StoreError> {
    let source_doc = store.find_one(READ_STATUSES, &selector.filter_for(source))?;
    let target_doc = store.find_one(READ_STATUSES, &selector.filter_for(target))?;

    let source_state = source_doc
        .map(|doc| {
            let status = doc.decode::<ReadStatus>(READ_STATUSES)?;
            Ok::<_, StoreError>((doc, status))
        })
        .transpose()?;
    let target_status = target_doc
        .map(|doc| doc.decode::<ReadStatus>(READ_STATUSES))
        .transpose()?;

    match (source_state, target_status) {
        (None, None) => Ok(Resolution::Absent),
        (None, Some(_)) => Ok(Resolution::Unchanged),
        (Some((source_doc, _)), None) => {
            let mut body = source_doc.body;
            let id = crate::model::DocumentId::generate();
            body.insert("_id".to_string(), Value::from(&id));
            body.insert("userId".to_string(), Value::from(target));
            store.insert_one(READ_STATUSES, Document::from_value(Value::Object(body))?)?;
            debug!(resource = selector.value(), "copied source read state to target");
            Ok(Resolution::Copied)
        }
        (Some((_, from_source)), Some(on_target)) => {
            // Ties keep the target.
            if from_source.last_updated <= on_target.last_updated {
                return Ok(Resolution::Unchanged);
            }
            let last_updated = from_source
                .last_updated
                .format(&Rfc3339)
                .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
            store.update_one(
                READ_STATUSES,
                &on_target.id,
                &Update::new()
                    .set("isRead", from_source.is_read)
                    .set("lastUpdated", last_updated),
                None,
            )?;
            debug!(resource = selector.value(), "newer source read state won");
            Ok(Resolution::Overwritten)
        }
    }
}

/// Resources the source holds read state for, split into posts and tags.
///
/// Rows that do not decode are logged and skipped.
pub fn source_resources(
    store: &dyn DocumentStore,
    source: &IdentityId,
) -> Result<Vec<ResourceSelector>, StoreError> {
    let mut posts = Vec::new();
    let mut tags = Vec::new();
    for document in store.find(READ_STATUSES, &Filter::new().eq("userId", source))? {
        let status: ReadStatus = match document.decode(READ_STATUSES) {
            Ok(status) => status,
            Err(err) => {
                warn!(document = %document.id, error = %err, "skipping unreadable read status");
                continue;
            }
        };
        if let Some(post_id) = status.post_id.filter(|id| !id.is_empty()) {
            posts.push(ResourceSelector::Post(post_id));
        }
        if let Some(tag_id) = status.tag_id.filter(|id| !id.is_empty()) {
            tags.push(ResourceSelector::Tag(tag_id));
        }
    }
    posts.extend(tags);
    Ok(posts)
}
