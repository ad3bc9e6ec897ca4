//! Identity lookup in the users collection.

use crate::error::{ReconcileError, Result};
use crate::model::{Identity, IdentityId, USERS};
use crate::query::Filter;
use crate::store::DocumentStore;

/// How an operator names an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRef {
    Id(IdentityId),
    Email(String),
}

impl IdentityRef {
    pub fn resolve(&self, store: &dyn DocumentStore) -> Result<IdentityId> {
        match self {
            IdentityRef::Id(id) => Ok(load(store, id)?.id),
            IdentityRef::Email(email) => {
                let mut matches = find_by_email(store, email)?;
                match matches.len() {
                    0 => Err(ReconcileError::NotFound {
                        kind: "identity with email",
                        id: email.clone(),
                    }),
                    1 => Ok(matches.remove(0).id),
                    n => Err(ReconcileError::Validation(format!(
                        "email {email} matches {n} accounts; name the account by id"
                    ))),
                }
            }
        }
    }
}

/// Load an identity, failing with `NotFound` when absent.
pub fn load(store: &dyn DocumentStore, id: &IdentityId) -> Result<Identity> {
    let document = store
        .get(USERS, &id.document_id())?
        .ok_or_else(|| ReconcileError::identity_not_found(id.as_str()))?;
    Ok(document.decode(USERS)?)
}

/// Accounts whose primary or secondary address matches `email`, ignoring case.
pub fn find_by_email(store: &dyn DocumentStore, email: &str) -> Result<Vec<Identity>> {
    let mut found = Vec::new();
    for document in store.find(USERS, &Filter::new())? {
        let identity: Identity = document.decode(USERS)?;
        if identity.has_email(email) {
            found.push(identity);
        }
    }
    Ok(found)
}
