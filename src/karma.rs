//! Reputation recomputation from the vote ledger.

use crate::error::{ReconcileError, Result};
use crate::identity;
use crate::ledger::VoteLedger;
use crate::model::IdentityId;
use crate::store::DocumentStore;

/// Sum of ledger vote weights plus the identity's legacy carry-over.
///
/// Pure function of store state: two calls without intervening vote changes
/// return the same value.
pub fn compute_reputation(store: &dyn DocumentStore, id: &IdentityId) -> Result<i64> {
    let identity = identity::load(store, id)?;
    let ledger = VoteLedger::new(store, identity.id.clone());
    let overflow = || ReconcileError::Overflow {
        what: "karma",
        id: identity.id.to_string(),
    };
    let mut total: i64 = 0;
    for vote in ledger.read()? {
        total = total.checked_add(vote?.power).ok_or_else(overflow)?;
    }
    total.checked_add(identity.legacy_karma).ok_or_else(overflow)
}
