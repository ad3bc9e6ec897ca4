//! # Reconcile
//!
//! An account reconciliation engine: merges every piece of content and
//! reputation owned by a source account into a target account inside a
//! document store.
//!
//! The engine transfers owner references collection by collection, collapses
//! per-user read state by recency, rewrites vote subjects and casters,
//! recomputes karma from the vote ledger, retires the source slug and
//! soft-deletes the source. Runs are sequential, non-transactional and safe to
//! repeat.

pub mod config;
pub mod conflicts;
pub mod error;
pub mod identity;
pub mod karma;
pub mod ledger;
pub mod merge;
pub mod model;
pub mod participants;
pub mod persistence;
pub mod query;
pub mod slug;
pub mod store;
pub mod transfer;
pub mod utils;

// Re-export main types for convenience
pub use config::{MergeConfig, ReconcileConfig};
pub use conflicts::{Resolution, ResourceSelector};
pub use error::ReconcileError;
pub use identity::IdentityRef;
pub use merge::{MergePlan, MergeReport, MergeRequest, MergeState, MergeStep, StepReport};
pub use model::{Document, DocumentId, Identity, IdentityId, ReadStatus, VoteRecord};
pub use persistence::PersistentStore;
pub use query::{Filter, Update};
pub use store::{DocumentStore, Store, StoreError, StoreMetrics};
pub use transfer::{CollectionSpec, TransferReport};

/// Main API for account reconciliation
pub struct Reconciler {
    store: Box<dyn DocumentStore>,
    config: MergeConfig,
    plan: MergePlan,
}

impl Reconciler {
    /// Create a reconciler over an empty in-memory store
    pub fn new(config: MergeConfig) -> Self {
        Self::with_store(Store::new(), config)
    }

    /// Create a reconciler with a custom store implementation.
    pub fn with_store<S>(store: S, config: MergeConfig) -> Self
    where
        S: DocumentStore + 'static,
    {
        Self {
            store: Box::new(store),
            config,
            plan: MergePlan::standard(),
        }
    }

    /// Replace the standard merge plan.
    pub fn with_plan(mut self, plan: MergePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn DocumentStore {
        self.store.as_mut()
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn plan(&self) -> &MergePlan {
        &self.plan
    }

    /// Merge the source account into the target account.
    pub fn merge_accounts(&mut self, request: &MergeRequest) -> Result<MergeReport, ReconcileError> {
        merge::MergeOrchestrator::new(self.store.as_mut(), &self.config, &self.plan).run(request)
    }

    /// Recompute an identity's reputation without writing it.
    pub fn compute_reputation(&self, id: &IdentityId) -> Result<i64, ReconcileError> {
        karma::compute_reputation(self.store.as_ref(), id)
    }

    /// Transfer one collection outside of a full merge.
    pub fn transfer_ownership(
        &mut self,
        spec: &CollectionSpec,
        source: &IdentityId,
        target: &IdentityId,
        dry_run: bool,
    ) -> Result<TransferReport, ReconcileError> {
        Ok(transfer::transfer_ownership(
            self.store.as_mut(),
            spec,
            source,
            target,
            dry_run,
        )?)
    }

    /// Collapse the two identities' state for one resource.
    pub fn merge_resource_state(
        &mut self,
        source: &IdentityId,
        target: &IdentityId,
        selector: &ResourceSelector,
    ) -> Result<Resolution, ReconcileError> {
        Ok(conflicts::merge_resource_state(
            self.store.as_mut(),
            source,
            target,
            selector,
        )?)
    }

    /// Resolve an operator-supplied account reference to an id.
    pub fn resolve(&self, reference: &IdentityRef) -> Result<IdentityId, ReconcileError> {
        reference.resolve(self.store.as_ref())
    }
}
