//! # Data Model
//!
//! Documents, identifiers and the typed views the engine decodes documents
//! into: identities, votes and per-user read states.

use crate::store::StoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use time::OffsetDateTime;

/// Collection holding user accounts.
pub const USERS: &str = "Users";
/// Append-only history of rich-content fields.
pub const REVISIONS: &str = "Revisions";
/// Vote ledger.
pub const VOTES: &str = "Votes";
/// Per-(user, post|tag) read state.
pub const READ_STATUSES: &str = "ReadStatuses";
/// Private conversations and their participant lists.
pub const CONVERSATIONS: &str = "Conversations";

/// Identifier of a document within its collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for inserted documents.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a user account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity as a document id in the users collection.
    pub fn document_id(&self) -> DocumentId {
        DocumentId(self.0.clone())
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&IdentityId> for Value {
    fn from(id: &IdentityId) -> Self {
        Value::String(id.0.clone())
    }
}

impl From<&DocumentId> for Value {
    fn from(id: &DocumentId) -> Self {
        Value::String(id.0.clone())
    }
}

/// A schemaless document as held by the store.
///
/// `body` always carries the `_id` field mirroring `id`. `version` is owned by
/// the store and bumped on every write; callers use it for optimistic checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub version: u64,
    pub body: Map<String, Value>,
}

impl Document {
    /// Build a document from a JSON object. A missing `_id` is generated.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let mut body = match value {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::InvalidDocument(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };
        let id = match body.get("_id").and_then(Value::as_str) {
            Some(id) => DocumentId::new(id),
            None => {
                let id = DocumentId::generate();
                body.insert("_id".to_string(), Value::from(&id));
                id
            }
        };
        Ok(Self {
            id,
            version: 0,
            body,
        })
    }

    /// Serialize a typed value into a fresh document.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        let json = serde_json::to_value(value)
            .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
        Self::from_value(json)
    }

    /// Decode the body into a typed view.
    pub fn decode<T: DeserializeOwned>(&self, collection: &str) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|source| {
            StoreError::Malformed {
                collection: collection.to_string(),
                id: self.id.0.clone(),
                source,
            }
        })
    }

    /// Value at a dotted path such as `contents.userId`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_path(&self.body, path)
    }
}

pub(crate) fn get_path<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = body.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed.
pub(crate) fn set_path(body: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };
    let mut current = body;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// A secondary email address entry on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub address: String,
    #[serde(default)]
    pub verified: bool,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(rename = "_id")]
    pub id: IdentityId,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub old_slugs: Vec<String>,
    #[serde(default)]
    pub karma: i64,
    #[serde(default)]
    pub af_karma: i64,
    /// Carry-over score from a prior system; never recomputed.
    #[serde(default)]
    pub legacy_karma: i64,
    #[serde(default)]
    pub post_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub emails: Vec<EmailAddress>,
    #[serde(default)]
    pub deleted: bool,
}

impl Identity {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: IdentityId::new(id),
            slug: slug.into(),
            old_slugs: Vec::new(),
            karma: 0,
            af_karma: 0,
            legacy_karma: 0,
            post_count: 0,
            comment_count: 0,
            email: None,
            emails: Vec::new(),
            deleted: false,
        }
    }

    /// Whether any of the account's addresses matches, ignoring case.
    pub fn has_email(&self, email: &str) -> bool {
        self.email
            .iter()
            .chain(self.emails.iter().map(|entry| &entry.address))
            .any(|address| address.eq_ignore_ascii_case(email))
    }
}

/// A reputation-affecting vote.
///
/// `user_id` is the caster, `author_ids` the subjects receiving the weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub user_id: IdentityId,
    #[serde(default)]
    pub author_ids: Vec<IdentityId>,
    #[serde(default)]
    pub power: i64,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub legacy: bool,
}

impl VoteRecord {
    pub fn new(
        id: impl Into<String>,
        caster: &IdentityId,
        authors: Vec<IdentityId>,
        power: i64,
    ) -> Self {
        Self {
            id: DocumentId::new(id),
            user_id: caster.clone(),
            author_ids: authors,
            power,
            cancelled: false,
            legacy: false,
        }
    }
}

/// Read state of one user for one post or tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub user_id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}
