//! # Merge Orchestrator
//!
//! Runs the fixed, ordered plan of merge steps that moves everything a source
//! account owns onto a target account.
//!
//! ## Execution model
//!
//! ```text
//! Pending ──▶ InProgress(0) ──▶ ... ──▶ InProgress(n-1) ──▶ Complete
//!                  │
//!                  └──(halt_on_step_failure)──▶ Failed(i)
//! ```
//!
//! Steps are not transactional and nothing is rolled back. Every step is safe
//! to re-run, and no step depends on an earlier one having succeeded, so a
//! failed step is recorded and the run moves on.

use crate::config::MergeConfig;
use crate::conflicts::{self, Resolution, ResourceSelector};
use crate::error::{ReconcileError, Result};
use crate::identity;
use crate::karma;
use crate::model::{Identity, IdentityId, CONVERSATIONS, USERS, VOTES};
use crate::participants::{self, MembershipReport};
use crate::query::{Filter, Update};
use crate::slug;
use crate::store::DocumentStore;
use crate::transfer::{self, CollectionSpec, TransferReport};
use std::fmt;
use tracing::{error, info, info_span};

/// One entry of a merge plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStep {
    /// Owner-field transfer for a registered collection.
    Transfer(CollectionSpec),
    /// Participant lists of private conversations.
    Conversations,
    /// Per-post and per-tag read states.
    ReadStatuses,
    /// Vote subjects and casters, then karma recomputation.
    Votes,
    /// Retire the source slug and record it on the target.
    SlugSwap,
    /// Mark the source identity deleted.
    SoftDelete,
}

impl MergeStep {
    pub fn name(&self) -> &str {
        match self {
            MergeStep::Transfer(spec) => &spec.name,
            MergeStep::Conversations => "conversations",
            MergeStep::ReadStatuses => "read-statuses",
            MergeStep::Votes => "votes",
            MergeStep::SlugSwap => "slug-swap",
            MergeStep::SoftDelete => "soft-delete",
        }
    }
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered list of steps a merge runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    steps: Vec<MergeStep>,
}

impl MergePlan {
    pub fn new(steps: Vec<MergeStep>) -> Self {
        Self { steps }
    }

    /// The forum account-merge plan.
    ///
    /// Event logs and revisions are not transferred as collections; revisions
    /// follow their documents' rich-content fields.
    pub fn standard() -> Self {
        let transfer = |name: &str| MergeStep::Transfer(CollectionSpec::new(name));
        let editable = |name: &str, fields: &[&str]| {
            MergeStep::Transfer(CollectionSpec::new(name).with_editable_fields(fields))
        };
        Self::new(vec![
            transfer("Bans"),
            transfer("Subscriptions"),
            editable("Posts", &["contents", "moderationGuidelines", "customHighlight"]),
            editable("Comments", &["contents"]),
            editable("Tags", &["description"]),
            transfer("TagRels"),
            transfer("RSSFeeds"),
            transfer("PetrovDayLaunchs"),
            transfer("Reports"),
            MergeStep::Conversations,
            editable("Messages", &["contents"]),
            transfer("Notifications"),
            MergeStep::ReadStatuses,
            editable("Sequences", &["contents"]),
            editable("Collections", &["contents"]),
            editable("Localgroups", &["contents"]),
            transfer("ReviewVotes"),
            MergeStep::Votes,
            MergeStep::SlugSwap,
            transfer("EmailTokens"),
            MergeStep::SoftDelete,
        ])
    }

    pub fn steps(&self) -> &[MergeStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for MergePlan {
    fn default() -> Self {
        Self::standard()
    }
}

/// Operator request naming the two accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: IdentityId,
    pub target: IdentityId,
    /// Must be given explicitly; a missing value is a validation error.
    pub dry_run: Option<bool>,
}

impl MergeRequest {
    pub fn new(source: IdentityId, target: IdentityId, dry_run: bool) -> Self {
        Self {
            source,
            target,
            dry_run: Some(dry_run),
        }
    }

    /// Check the request and return the dry-run flag.
    pub fn validate(&self) -> Result<bool> {
        let dry_run = self
            .dry_run
            .ok_or_else(|| ReconcileError::Validation("dryRun value missing".to_string()))?;
        if self.source.as_str().is_empty() || self.target.as_str().is_empty() {
            return Err(ReconcileError::Validation(
                "source and target ids must be non-empty".to_string(),
            ));
        }
        if self.source == self.target {
            return Err(ReconcileError::Validation(format!(
                "cannot merge identity {} into itself",
                self.source
            )));
        }
        Ok(dry_run)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Pending,
    InProgress { step: usize },
    Complete,
    Failed { step: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatusReport {
    pub post_ids: usize,
    pub tag_ids: usize,
    pub overwritten: usize,
    pub copied: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReport {
    /// Votes listing the source among their subjects.
    pub author_votes: usize,
    /// Votes cast by the source.
    pub cast_votes: usize,
    pub authors_rewritten: usize,
    pub casts_rewritten: usize,
    /// Recomputed target reputation; `None` on a dry run.
    pub karma: Option<i64>,
    pub af_karma: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugReport {
    pub retired_slug: String,
    pub target_old_slugs: Vec<String>,
    pub applied: bool,
}

/// What a successful step did (or would do, on a dry run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    Transfer(TransferReport),
    Membership(MembershipReport),
    ReadStatuses(ReadStatusReport),
    Votes(VoteReport),
    SlugSwap(SlugReport),
    SoftDelete { applied: bool },
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: String,
    pub result: Result<StepReport>,
}

/// Per-step results of one merge run.
#[derive(Debug)]
pub struct MergeReport {
    pub source: IdentityId,
    pub target: IdentityId,
    pub dry_run: bool,
    pub state: MergeState,
    pub steps: Vec<StepOutcome>,
}

impl MergeReport {
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|outcome| outcome.step == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Completed with every step succeeding.
    pub fn is_clean(&self) -> bool {
        self.state == MergeState::Complete && self.failures().next().is_none()
    }
}

/// Identities as they were when the run started.
struct MergeContext {
    source: Identity,
    target: Identity,
    dry_run: bool,
}

/// Runs a [`MergePlan`] against a store.
pub struct MergeOrchestrator<'a> {
    store: &'a mut dyn DocumentStore,
    config: &'a MergeConfig,
    plan: &'a MergePlan,
    state: MergeState,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(
        store: &'a mut dyn DocumentStore,
        config: &'a MergeConfig,
        plan: &'a MergePlan,
    ) -> Self {
        Self {
            store,
            config,
            plan,
            state: MergeState::Pending,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Validate the request, load both identities, then run every step.
    ///
    /// Validation and missing identities are returned as errors before any
    /// step runs. Step failures are captured in the report.
    pub fn run(&mut self, request: &MergeRequest) -> Result<MergeReport> {
        let dry_run = request.validate()?;
        let source = identity::load(&*self.store, &request.source)?;
        let target = identity::load(&*self.store, &request.target)?;
        if target.deleted {
            return Err(ReconcileError::Validation(format!(
                "target account {} is deleted",
                target.id
            )));
        }
        info!(
            source = %source.id,
            target = %target.id,
            dry_run,
            steps = self.plan.len(),
            "starting account merge"
        );

        let ctx = MergeContext {
            source,
            target,
            dry_run,
        };
        let mut report = MergeReport {
            source: request.source.clone(),
            target: request.target.clone(),
            dry_run,
            state: MergeState::Pending,
            steps: Vec::with_capacity(self.plan.len()),
        };

        let plan = self.plan;
        for (index, step) in plan.steps().iter().enumerate() {
            self.state = MergeState::InProgress { step: index };
            let span = info_span!("merge_step", step = %step, index);
            let _guard = span.enter();

            let result = self.run_step(step, &ctx);
            match &result {
                Ok(_) => info!(step = %step, "merge step finished"),
                Err(err) => error!(step = %step, error = %err, "merge step failed"),
            }
            let failed = result.is_err();
            report.steps.push(StepOutcome {
                step: step.name().to_string(),
                result,
            });
            if failed && self.config.halt_on_step_failure {
                self.state = MergeState::Failed { step: index };
                report.state = self.state;
                return Ok(report);
            }
        }

        self.state = MergeState::Complete;
        report.state = self.state;
        info!(
            source = %report.source,
            target = %report.target,
            failed_steps = report.failures().count(),
            "account merge finished"
        );
        Ok(report)
    }

    fn run_step(&mut self, step: &MergeStep, ctx: &MergeContext) -> Result<StepReport> {
        match step {
            MergeStep::Transfer(spec) => Ok(StepReport::Transfer(transfer::transfer_ownership(
                self.store,
                spec,
                &ctx.source.id,
                &ctx.target.id,
                ctx.dry_run,
            )?)),
            MergeStep::Conversations => self.merge_conversations(ctx).map(StepReport::Membership),
            MergeStep::ReadStatuses => self.merge_read_statuses(ctx).map(StepReport::ReadStatuses),
            MergeStep::Votes => self.merge_votes(ctx).map(StepReport::Votes),
            MergeStep::SlugSwap => self.swap_slugs(ctx).map(StepReport::SlugSwap),
            MergeStep::SoftDelete => self.soft_delete(ctx),
        }
    }

    fn merge_conversations(&mut self, ctx: &MergeContext) -> Result<MembershipReport> {
        let (source, target) = (&ctx.source.id, &ctx.target.id);
        if ctx.dry_run {
            let report = participants::count_members(
                &*self.store,
                CONVERSATIONS,
                "participantIds",
                source,
                target,
            )?;
            info!(
                source_conversations = report.source_count_before,
                target_conversations = report.target_count_before,
                "counted conversations"
            );
            return Ok(report);
        }
        Ok(participants::replace_member(
            self.store,
            CONVERSATIONS,
            "participantIds",
            source,
            target,
            self.config.max_version_retries,
        )?)
    }

    fn merge_read_statuses(&mut self, ctx: &MergeContext) -> Result<ReadStatusReport> {
        let selectors = conflicts::source_resources(&*self.store, &ctx.source.id)?;
        let mut report = ReadStatusReport::default();
        for selector in &selectors {
            match selector {
                ResourceSelector::Post(_) => report.post_ids += 1,
                ResourceSelector::Tag(_) => report.tag_ids += 1,
            }
        }
        info!(
            post_ids = report.post_ids,
            tag_ids = report.tag_ids,
            "counted source read statuses"
        );
        if ctx.dry_run {
            return Ok(report);
        }
        for selector in &selectors {
            match conflicts::merge_resource_state(
                self.store,
                &ctx.source.id,
                &ctx.target.id,
                selector,
            )? {
                Resolution::Overwritten => report.overwritten += 1,
                Resolution::Copied => report.copied += 1,
                Resolution::Unchanged | Resolution::Absent => report.unchanged += 1,
            }
        }
        Ok(report)
    }

    fn merge_votes(&mut self, ctx: &MergeContext) -> Result<VoteReport> {
        let (source, target) = (&ctx.source.id, &ctx.target.id);
        let author_votes = self
            .store
            .count(VOTES, &Filter::new().eq("authorIds", source))?;
        let cast_votes = self.store.count(VOTES, &Filter::new().eq("userId", source))?;
        info!(author_votes, cast_votes, "counted source votes");

        let mut report = VoteReport {
            author_votes,
            cast_votes,
            authors_rewritten: 0,
            casts_rewritten: 0,
            karma: None,
            af_karma: None,
        };
        if ctx.dry_run {
            return Ok(report);
        }

        info!("transferring votes that target source user");
        report.authors_rewritten = participants::replace_member(
            self.store,
            VOTES,
            "authorIds",
            source,
            target,
            self.config.max_version_retries,
        )?
        .rewritten;

        info!("transferring votes cast by source user");
        report.casts_rewritten = self.store.update_many(
            VOTES,
            &Filter::new().eq("userId", source),
            &Update::new().set("userId", target),
        )?;

        // Alignment-forum karma is carried over by addition, not recomputed.
        let karma = karma::compute_reputation(&*self.store, target)?;
        let af_karma = ctx
            .source
            .af_karma
            .checked_add(ctx.target.af_karma)
            .ok_or_else(|| ReconcileError::Overflow {
                what: "afKarma",
                id: target.to_string(),
            })?;
        info!(karma, af_karma, "writing recomputed karma");
        self.store.update_one(
            USERS,
            &target.document_id(),
            &Update::new().set("karma", karma).set("afKarma", af_karma),
            None,
        )?;
        report.karma = Some(karma);
        report.af_karma = Some(af_karma);
        Ok(report)
    }

    fn swap_slugs(&mut self, ctx: &MergeContext) -> Result<SlugReport> {
        let base = format!("{}{}", ctx.source.slug, self.config.retired_slug_suffix);
        let retired_slug = slug::unused_slug(&*self.store, &base)?;
        let target_old_slugs: Vec<String> = ctx
            .target
            .old_slugs
            .iter()
            .chain(ctx.source.old_slugs.iter())
            .chain(std::iter::once(&ctx.source.slug))
            .cloned()
            .collect();
        info!(
            slug = %ctx.source.slug,
            retired = %retired_slug,
            old_slugs = ?target_old_slugs,
            "changing slugs"
        );

        let mut report = SlugReport {
            retired_slug,
            target_old_slugs,
            applied: false,
        };
        if ctx.dry_run {
            return Ok(report);
        }
        self.store.update_one(
            USERS,
            &ctx.source.id.document_id(),
            &Update::new().set("slug", report.retired_slug.as_str()),
            None,
        )?;
        self.store.update_one(
            USERS,
            &ctx.target.id.document_id(),
            &Update::new().set("oldSlugs", report.target_old_slugs.clone()),
            None,
        )?;
        report.applied = true;
        Ok(report)
    }

    fn soft_delete(&mut self, ctx: &MergeContext) -> Result<StepReport> {
        if ctx.dry_run {
            return Ok(StepReport::SoftDelete { applied: false });
        }
        info!(source = %ctx.source.id, "marking old account as deleted");
        self.store.update_one(
            USERS,
            &ctx.source.id.document_id(),
            &Update::new().set("deleted", true),
            None,
        )?;
        Ok(StepReport::SoftDelete { applied: true })
    }
}
