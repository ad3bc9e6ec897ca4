#[path = "../src/test_support.rs"]
mod test_support;

use reconcile_rs::merge::MergeOrchestrator;
use reconcile_rs::model::{CONVERSATIONS, USERS, VOTES};
use reconcile_rs::{
    Document, DocumentStore, Filter, Identity, IdentityId, IdentityRef, MergeConfig, MergePlan,
    MergeRequest, MergeState, ReconcileError, Reconciler, StepReport, Store, VoteRecord,
};
use serde_json::json;
use test_support::{
    load_identity, read_status_of, seed_identity, seed_posts, seed_read_status,
    seed_tag_read_status, seed_user, seed_vote, tag_read_status_of,
};
use time::macros::datetime;

/// Two accounts with posts, votes, read state, a shared conversation and
/// slug history.
fn seeded_store() -> (Store, IdentityId, IdentityId) {
    let mut store = Store::new();

    let mut alice = Identity::new("a", "alice");
    alice.old_slugs = vec!["alice-2019".to_string()];
    alice.af_karma = 4;
    alice.email = Some("Alice@Example.com".to_string());
    let source = seed_identity(&mut store, alice);

    let mut bob = Identity::new("b", "bob");
    bob.old_slugs = vec!["bobby".to_string()];
    bob.af_karma = 6;
    let target = seed_identity(&mut store, bob);

    let carol = seed_user(&mut store, "c", "carol");
    let dave = seed_user(&mut store, "d", "dave");

    seed_posts(&mut store, &source, &["p1", "p2", "p3"]);
    seed_posts(&mut store, &target, &["p4", "p5"]);

    seed_vote(&mut store, "v1", &carol, &target, 10, false);
    seed_vote(&mut store, "v2", &carol, &source, 1, false);
    seed_vote(&mut store, "v3", &dave, &source, 2, false);
    seed_vote(&mut store, "v4", &dave, &source, -1, false);
    seed_vote(&mut store, "v5", &carol, &source, 100, true);
    seed_vote(&mut store, "v6", &source, &dave, 3, false);

    seed_read_status(&mut store, "rs1", &source, "p9", true, datetime!(2024-03-02 10:00 UTC));
    seed_read_status(&mut store, "rs2", &target, "p9", false, datetime!(2024-03-01 10:00 UTC));
    seed_read_status(&mut store, "rs3", &source, "p8", true, datetime!(2024-01-01 00:00 UTC));

    store
        .insert_one(
            CONVERSATIONS,
            Document::from_value(json!({"_id": "c1", "participantIds": ["a", "c"]})).unwrap(),
        )
        .unwrap();
    store
        .insert_one(
            CONVERSATIONS,
            Document::from_value(json!({"_id": "c2", "participantIds": ["a", "b"]})).unwrap(),
        )
        .unwrap();

    (store, source, target)
}

#[test]
fn merge_moves_content_reputation_and_identity() -> anyhow::Result<()> {
    let (store, source, target) = seeded_store();
    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());

    let report = reconciler.merge_accounts(&MergeRequest::new(source.clone(), target.clone(), false))?;
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.state, MergeState::Complete);
    assert_eq!(report.steps.len(), MergePlan::standard().len());

    let store = reconciler.store();
    assert_eq!(store.count("Posts", &Filter::new().eq("userId", &target))?, 5);
    assert_eq!(store.count("Posts", &Filter::new().eq("userId", &source))?, 0);
    let post = store.get("Posts", &"p1".into())?.unwrap();
    assert_eq!(post.get_path("contents.userId"), Some(&json!("b")));

    match &report.step("Posts").unwrap().result {
        Ok(StepReport::Transfer(transfer)) => {
            assert_eq!(transfer.source_count_before, 3);
            assert_eq!(transfer.target_count_before, 2);
            assert_eq!(transfer.target_count_after, Some(5));
        }
        other => panic!("unexpected posts outcome: {other:?}"),
    }

    let bob = load_identity(store, &target);
    assert_eq!(bob.karma, 12);
    assert_eq!(bob.af_karma, 10);
    assert_eq!(bob.old_slugs, vec!["bobby", "alice-2019", "alice"]);

    let alice = load_identity(store, &source);
    assert_eq!(alice.slug, "alice-old");
    assert!(alice.deleted);

    // Votes cast by the source now belong to the target.
    assert_eq!(store.count("Votes", &Filter::new().eq("userId", &source))?, 0);
    assert_eq!(store.count("Votes", &Filter::new().eq("authorIds", &source))?, 0);

    let c1 = store.get(CONVERSATIONS, &"c1".into())?.unwrap();
    assert_eq!(c1.body["participantIds"], json!(["b", "c"]));
    let c2 = store.get(CONVERSATIONS, &"c2".into())?.unwrap();
    assert_eq!(c2.body["participantIds"], json!(["b"]));

    let p9 = read_status_of(store, &target, "p9");
    assert_eq!(p9.len(), 1);
    assert!(p9[0].is_read);
    assert_eq!(p9[0].last_updated, datetime!(2024-03-02 10:00 UTC));
    assert_eq!(read_status_of(store, &target, "p8").len(), 1);

    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> anyhow::Result<()> {
    let (mut store, source, target) = seeded_store();
    let snapshot = store.clone();
    let writes_before = store.metrics().writes;
    let config = MergeConfig::default();
    let plan = MergePlan::standard();

    let report = MergeOrchestrator::new(&mut store, &config, &plan)
        .run(&MergeRequest::new(source, target, true))?;

    assert!(report.dry_run);
    assert!(report.is_clean());
    assert_eq!(store.metrics().writes, writes_before);
    assert_eq!(store, snapshot);

    match &report.step("Posts").unwrap().result {
        Ok(StepReport::Transfer(transfer)) => {
            assert_eq!(transfer.source_count_before, 3);
            assert_eq!(transfer.target_count_after, None);
        }
        other => panic!("unexpected posts outcome: {other:?}"),
    }
    match &report.step("slug-swap").unwrap().result {
        Ok(StepReport::SlugSwap(slug)) => {
            assert_eq!(slug.retired_slug, "alice-old");
            assert!(!slug.applied);
        }
        other => panic!("unexpected slug outcome: {other:?}"),
    }
    Ok(())
}

#[test]
fn retired_slug_skips_current_and_historical_slugs() -> anyhow::Result<()> {
    let (mut store, source, target) = seeded_store();
    seed_user(&mut store, "x", "alice-old");
    let mut holder = Identity::new("y", "yvonne");
    holder.old_slugs = vec!["alice-old-1".to_string()];
    seed_identity(&mut store, holder);

    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());
    reconciler.merge_accounts(&MergeRequest::new(source.clone(), target, false))?;

    assert_eq!(load_identity(reconciler.store(), &source).slug, "alice-old-2");
    Ok(())
}

#[test]
fn configured_suffix_is_used() -> anyhow::Result<()> {
    let (store, source, target) = seeded_store();
    let config = MergeConfig {
        retired_slug_suffix: "-merged".to_string(),
        ..MergeConfig::default()
    };
    let mut reconciler = Reconciler::with_store(store, config);
    reconciler.merge_accounts(&MergeRequest::new(source.clone(), target, false))?;

    assert_eq!(load_identity(reconciler.store(), &source).slug, "alice-merged");
    Ok(())
}

#[test]
fn accounts_resolve_by_email_before_merging() -> anyhow::Result<()> {
    let (store, source, target) = seeded_store();
    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());

    let resolved = reconciler.resolve(&IdentityRef::Email("alice@example.com".to_string()))?;
    assert_eq!(resolved, source);

    let report = reconciler.merge_accounts(&MergeRequest::new(resolved, target, false))?;
    assert!(report.is_clean());
    let deleted = reconciler.store().get(USERS, &source.document_id())?.unwrap();
    assert_eq!(deleted.body["deleted"], json!(true));
    Ok(())
}

#[test]
fn reputation_is_stable_between_reads() -> anyhow::Result<()> {
    let (store, _source, target) = seeded_store();
    let reconciler = Reconciler::with_store(store, MergeConfig::default());

    let first = reconciler.compute_reputation(&target)?;
    let second = reconciler.compute_reputation(&target)?;
    assert_eq!(first, 10);
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn legacy_karma_and_shared_votes_follow_the_target() -> anyhow::Result<()> {
    let mut store = Store::new();
    let source = seed_user(&mut store, "a", "alice");
    let mut bob = Identity::new("b", "bob");
    bob.legacy_karma = 10;
    let target = seed_identity(&mut store, bob);
    let carol = seed_user(&mut store, "c", "carol");
    let xavier = seed_user(&mut store, "x", "xavier");

    seed_vote(&mut store, "v1", &carol, &source, 1, false);
    seed_vote(&mut store, "v2", &carol, &source, 2, false);
    seed_vote(&mut store, "v3", &carol, &source, -1, false);
    seed_vote(&mut store, "v4", &carol, &source, 100, true);
    for (id, authors) in [
        ("m1", vec![source.clone(), xavier.clone()]),
        ("m2", vec![xavier.clone(), source.clone(), target.clone()]),
    ] {
        let vote = VoteRecord::new(id, &carol, authors, 0);
        store.insert_one(VOTES, Document::encode(&vote)?)?;
    }

    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());
    let report = reconciler.merge_accounts(&MergeRequest::new(source, target.clone(), false))?;
    assert!(report.is_clean());

    let store = reconciler.store();
    assert_eq!(load_identity(store, &target).karma, 12);
    let m1 = store.get(VOTES, &"m1".into())?.unwrap();
    assert_eq!(m1.body["authorIds"], json!(["b", "x"]));
    let m2 = store.get(VOTES, &"m2".into())?.unwrap();
    assert_eq!(m2.body["authorIds"], json!(["x", "b"]));
    Ok(())
}

#[test]
fn tag_read_state_is_merged_by_recency() -> anyhow::Result<()> {
    let mut store = Store::new();
    let source = seed_user(&mut store, "a", "alice");
    let target = seed_user(&mut store, "b", "bob");
    seed_tag_read_status(&mut store, "s1", &source, "t1", true, datetime!(2024-06-02 12:00 UTC));
    seed_tag_read_status(&mut store, "b1", &target, "t1", false, datetime!(2024-06-01 12:00 UTC));
    seed_tag_read_status(&mut store, "s2", &source, "t2", true, datetime!(2024-06-03 12:00 UTC));
    seed_tag_read_status(&mut store, "s3", &source, "t3", false, datetime!(2024-05-01 12:00 UTC));
    seed_tag_read_status(&mut store, "b3", &target, "t3", true, datetime!(2024-05-05 12:00 UTC));

    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());
    let report = reconciler.merge_accounts(&MergeRequest::new(source, target.clone(), false))?;

    match &report.step("read-statuses").unwrap().result {
        Ok(StepReport::ReadStatuses(statuses)) => {
            assert_eq!(statuses.post_ids, 0);
            assert_eq!(statuses.tag_ids, 3);
            assert_eq!(statuses.overwritten, 1);
            assert_eq!(statuses.copied, 1);
            assert_eq!(statuses.unchanged, 1);
        }
        other => panic!("unexpected read-statuses outcome: {other:?}"),
    }

    let store = reconciler.store();
    let t1 = tag_read_status_of(store, &target, "t1");
    assert_eq!(t1.len(), 1);
    assert!(t1[0].is_read);
    assert_eq!(t1[0].last_updated, datetime!(2024-06-02 12:00 UTC));
    assert_eq!(tag_read_status_of(store, &target, "t2").len(), 1);
    let t3 = tag_read_status_of(store, &target, "t3");
    assert!(t3[0].is_read);
    assert_eq!(t3[0].last_updated, datetime!(2024-05-05 12:00 UTC));
    Ok(())
}

#[test]
fn deleted_target_is_refused() -> anyhow::Result<()> {
    let mut store = Store::new();
    let source = seed_user(&mut store, "a", "alice");
    let mut bob = Identity::new("b", "bob");
    bob.deleted = true;
    let target = seed_identity(&mut store, bob);
    seed_posts(&mut store, &source, &["p1"]);
    let writes_before = store.metrics().writes;

    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());
    let err = reconciler
        .merge_accounts(&MergeRequest::new(source.clone(), target, false))
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Validation(_)));
    let store = reconciler.store();
    assert_eq!(store.metrics().writes, writes_before);
    assert!(!load_identity(store, &source).deleted);
    assert_eq!(store.count("Posts", &Filter::new().eq("userId", &source))?, 1);
    Ok(())
}

#[test]
fn completed_merge_can_be_run_again() -> anyhow::Result<()> {
    let (store, source, target) = seeded_store();
    let mut reconciler = Reconciler::with_store(store, MergeConfig::default());
    reconciler.merge_accounts(&MergeRequest::new(source.clone(), target.clone(), false))?;

    let rerun = reconciler.merge_accounts(&MergeRequest::new(source, target.clone(), false))?;
    assert!(rerun.is_clean());
    let store = reconciler.store();
    assert_eq!(store.count("Posts", &Filter::new().eq("userId", &target))?, 5);
    assert_eq!(load_identity(store, &target).karma, 12);
    Ok(())
}
