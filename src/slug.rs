//! Slug allocation against current and historical identity slugs.

use crate::model::USERS;
use crate::query::Filter;
use crate::store::{DocumentStore, StoreError};

fn is_taken(store: &dyn DocumentStore, slug: &str) -> Result<bool, StoreError> {
    Ok(store.count(USERS, &Filter::new().eq("slug", slug))? > 0
        || store.count(USERS, &Filter::new().eq("oldSlugs", slug))? > 0)
}

/// First slug of `base`, `base-1`, `base-2`, ... that no identity uses as its
/// slug or lists among its old slugs.
pub fn unused_slug(store: &dyn DocumentStore, base: &str) -> Result<String, StoreError> {
    let mut candidate = base.to_string();
    let mut index = 0u32;
    while is_taken(store, &candidate)? {
        index += 1;
        candidate = format!("{base}-{index}");
    }
    Ok(candidate)
}
