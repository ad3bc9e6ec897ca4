//! Engine-level error taxonomy.

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Source or target identity does not exist. Aborts before any step runs.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Infrastructure failure reported by the store.
    #[error(transparent)]
    StorageUnavailable(#[from] StoreError),
    /// Malformed merge request. Aborts before any step runs.
    #[error("invalid request: {0}")]
    Validation(String),
    /// A karma total does not fit in an `i64`.
    #[error("{what} overflowed for {id}")]
    Overflow { what: &'static str, id: String },
}

impl ReconcileError {
    pub fn identity_not_found(id: impl Into<String>) -> Self {
        ReconcileError::NotFound {
            kind: "identity",
            id: id.into(),
        }
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
