//! Membership rewrites on id-list fields (conversation participants, vote authors).
//!
//! Each document is rewritten by reading the whole list, replacing the source
//! id and writing the list back guarded by the document version.

use crate::model::IdentityId;
use crate::query::{Filter, Update};
use crate::store::{DocumentStore, StoreError};
use serde_json::Value;
use tracing::debug;

/// Outcome of rewriting one list field across a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipReport {
    pub source_count_before: usize,
    pub target_count_before: usize,
    pub rewritten: usize,
    pub version_retries: u32,
}

/// Replace the first occurrence of `source` with `target`.
///
/// When `target` is already a member the source entry is dropped instead, so
/// the list never gains a duplicate.
pub fn replace_in_list(members: &[Value], source: &Value, target: &Value) -> Vec<Value> {
    let already_member = members.contains(target);
    let mut replaced = false;
    let mut out = Vec::with_capacity(members.len());
    for member in members {
        if !replaced && member == source {
            replaced = true;
            if !already_member {
                out.push(target.clone());
            }
        } else {
            out.push(member.clone());
        }
    }
    out
}

/// Count how many documents list `source` and `target` in `field`.
pub fn count_members(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    source: &IdentityId,
    target: &IdentityId,
) -> Result<MembershipReport, StoreError> {
    Ok(MembershipReport {
        source_count_before: store.count(collection, &Filter::new().eq(field, source))?,
        target_count_before: store.count(collection, &Filter::new().eq(field, target))?,
        ..MembershipReport::default()
    })
}

/// Swap `source` for `target` in `field` on every document listing the source.
///
/// Lost optimistic writes are retried from a fresh read up to `max_retries`
/// times per document before the conflict is returned.
pub fn replace_member(
    store: &mut dyn DocumentStore,
    collection: &str,
    field: &str,
    source: &IdentityId,
    target: &IdentityId,
    max_retries: u32,
) -> Result<MembershipReport, StoreError> {
    let mut report = count_members(store, collection, field, source, target)?;
    let source_value = Value::from(source);
    let target_value = Value::from(target);

    for document in store.find(collection, &Filter::new().eq(field, source))? {
        let id = document.id.clone();
        let mut current = document;
        let mut attempts = 0;
        loop {
            let members = match current.get_path(field) {
                Some(Value::Array(members)) => members.clone(),
                _ => break,
            };
            let replaced = replace_in_list(&members, &source_value, &target_value);
            if replaced == members {
                break;
            }
            let update = Update::new().set(field, Value::Array(replaced));
            match store.update_one(collection, &id, &update, Some(current.version)) {
                Ok(_) => {
                    report.rewritten += 1;
                    break;
                }
                Err(StoreError::VersionConflict { .. }) if attempts < max_retries => {
                    attempts += 1;
                    report.version_retries += 1;
                    debug!(%collection, document = %id, attempts, "retrying membership rewrite");
                    current = match store.get(collection, &id)? {
                        Some(fresh) => fresh,
                        None => break,
                    };
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(report)
}
