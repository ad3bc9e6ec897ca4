use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use time::OffsetDateTime;

use reconcile_rs::model::{READ_STATUSES, USERS, VOTES};
use reconcile_rs::{
    Document, DocumentId, DocumentStore, Filter, Identity, IdentityId, ReadStatus, StoreError,
    StoreMetrics, Update, VoteRecord,
};

#[allow(dead_code)]
pub fn seed_identity(store: &mut dyn DocumentStore, identity: Identity) -> IdentityId {
    let id = identity.id.clone();
    store
        .insert_one(USERS, Document::encode(&identity).expect("encode identity"))
        .expect("insert identity");
    id
}

#[allow(dead_code)]
pub fn seed_user(store: &mut dyn DocumentStore, id: &str, slug: &str) -> IdentityId {
    seed_identity(store, Identity::new(id, slug))
}

/// Insert posts owned by `owner`, each with a rich `contents` field.
#[allow(dead_code)]
pub fn seed_posts(store: &mut dyn DocumentStore, owner: &IdentityId, ids: &[&str]) {
    for id in ids {
        let document = Document::from_value(json!({
            "_id": id,
            "userId": owner.as_str(),
            "title": format!("post {id}"),
            "contents": {"html": "<p>hi</p>", "userId": owner.as_str()},
        }))
        .expect("post document");
        store.insert_one("Posts", document).expect("insert post");
    }
}

#[allow(dead_code)]
pub fn seed_vote(
    store: &mut dyn DocumentStore,
    id: &str,
    caster: &IdentityId,
    author: &IdentityId,
    power: i64,
    cancelled: bool,
) {
    let mut vote = VoteRecord::new(id, caster, vec![author.clone()], power);
    vote.cancelled = cancelled;
    store
        .insert_one(VOTES, Document::encode(&vote).expect("encode vote"))
        .expect("insert vote");
}

#[allow(dead_code)]
pub fn seed_read_status(
    store: &mut dyn DocumentStore,
    id: &str,
    user: &IdentityId,
    post_id: &str,
    is_read: bool,
    last_updated: OffsetDateTime,
) {
    let status = ReadStatus {
        id: DocumentId::new(id),
        user_id: user.clone(),
        post_id: Some(post_id.to_string()),
        tag_id: None,
        is_read,
        last_updated,
    };
    store
        .insert_one(READ_STATUSES, Document::encode(&status).expect("encode status"))
        .expect("insert status");
}

#[allow(dead_code)]
pub fn seed_tag_read_status(
    store: &mut dyn DocumentStore,
    id: &str,
    user: &IdentityId,
    tag_id: &str,
    is_read: bool,
    last_updated: OffsetDateTime,
) {
    let status = ReadStatus {
        id: DocumentId::new(id),
        user_id: user.clone(),
        post_id: None,
        tag_id: Some(tag_id.to_string()),
        is_read,
        last_updated,
    };
    store
        .insert_one(READ_STATUSES, Document::encode(&status).expect("encode status"))
        .expect("insert status");
}

#[allow(dead_code)]
pub fn tag_read_status_of(
    store: &dyn DocumentStore,
    user: &IdentityId,
    tag_id: &str,
) -> Vec<ReadStatus> {
    store
        .find(
            READ_STATUSES,
            &Filter::new().eq("userId", user).eq("tagId", tag_id),
        )
        .expect("find statuses")
        .iter()
        .map(|doc| doc.decode(READ_STATUSES).expect("decode status"))
        .collect()
}

#[allow(dead_code)]
pub fn read_status_of(
    store: &dyn DocumentStore,
    user: &IdentityId,
    post_id: &str,
) -> Vec<ReadStatus> {
    store
        .find(
            READ_STATUSES,
            &Filter::new().eq("userId", user).eq("postId", post_id),
        )
        .expect("find statuses")
        .iter()
        .map(|doc| doc.decode(READ_STATUSES).expect("decode status"))
        .collect()
}

#[allow(dead_code)]
pub fn load_identity(store: &dyn DocumentStore, id: &IdentityId) -> Identity {
    store
        .get(USERS, &id.document_id())
        .expect("get identity")
        .expect("identity exists")
        .decode(USERS)
        .expect("decode identity")
}

/// Votes generated for a subject plus the reputation they should add up to.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct GeneratedLedger {
    pub votes: usize,
    pub expected_sum: i64,
}

/// Insert `count` votes on `subject` from a pool of casters.
///
/// Roughly a fifth are cancelled, a tenth are self-votes and a tenth are
/// legacy; those do not contribute to `expected_sum`.
#[allow(dead_code)]
pub fn generate_ledger(
    store: &mut dyn DocumentStore,
    subject: &IdentityId,
    count: u32,
    seed: u64,
) -> GeneratedLedger {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expected_sum = 0;

    for i in 0..count {
        let self_vote = rng.random_bool(0.1);
        let caster = if self_vote {
            subject.clone()
        } else {
            IdentityId::new(format!("caster_{:04}", rng.random_range(0..50)))
        };
        let power = rng.random_range(-3..=10);
        let mut vote = VoteRecord::new(format!("vote_{:06}", i), &caster, vec![subject.clone()], power);
        vote.cancelled = rng.random_bool(0.2);
        vote.legacy = rng.random_bool(0.1);

        if !self_vote && !vote.cancelled && !vote.legacy {
            expected_sum += power;
        }
        store
            .insert_one(VOTES, Document::encode(&vote).expect("encode vote"))
            .expect("insert vote");
    }

    GeneratedLedger {
        votes: count as usize,
        expected_sum,
    }
}

/// Wraps a store and fails every operation on the named collections.
#[allow(dead_code)]
pub struct FlakyStore<S> {
    pub inner: S,
    failing: Vec<String>,
}

#[allow(dead_code)]
impl<S: DocumentStore> FlakyStore<S> {
    pub fn new(inner: S, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn check(&self, collection: &str) -> Result<(), StoreError> {
        if self.failing.iter().any(|name| name == collection) {
            return Err(StoreError::Unavailable(format!("{collection} is offline")));
        }
        Ok(())
    }
}

impl<S: DocumentStore> DocumentStore for FlakyStore<S> {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        self.check(collection)?;
        self.inner.find(collection, filter)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        self.check(collection)?;
        self.inner.count(collection, filter)
    }

    fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        self.check(collection)?;
        self.inner.get(collection, id)
    }

    fn update_one(
        &mut self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        self.check(collection)?;
        self.inner.update_one(collection, id, update, expected_version)
    }

    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError> {
        self.check(collection)?;
        self.inner.update_many(collection, filter, update)
    }

    fn insert_one(&mut self, collection: &str, document: Document) -> Result<DocumentId, StoreError> {
        self.check(collection)?;
        self.inner.insert_one(collection, document)
    }

    fn metrics(&self) -> StoreMetrics {
        self.inner.metrics()
    }
}
