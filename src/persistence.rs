use crate::config::{StoreConfig, DEFAULT_CACHE_CAPACITY};
use crate::model::{Document, DocumentId};
use crate::query::{Filter, Update};
use crate::store::{DocumentStore, StoreError, StoreMetrics};
use lru::LruCache;
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    DB,
};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";
const KEY_WRITES: &[u8] = b"writes";

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

type CacheKey = (String, DocumentId);

/// RocksDB-backed document store.
///
/// Documents are keyed by `collection \0 id` in a single column family so a
/// collection scan is a prefix iteration.
pub struct PersistentStore {
    db: DB,
    cache: Mutex<LruCache<CacheKey, Document>>,
    writes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub repair: bool,
    pub cache_capacity: usize,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self {
            repair: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl From<&StoreConfig> for PersistentOpenOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            repair: config.repair,
            cache_capacity: config.cache_capacity,
        }
    }
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self, StoreError> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path)?;
        validate_or_init_manifest(&db)?;
        let writes = load_metadata::<u64>(&db, KEY_WRITES)?.unwrap_or(0);
        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
            writes,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }

    fn documents_cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_DOCUMENTS)
            .ok_or_else(|| StoreError::Unavailable("missing documents column family".to_string()))
    }

    fn scan(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let cf = self.documents_cf()?;
        let prefix = encode_collection_prefix(collection);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        let mut documents = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            documents.push(decode_document(collection, &key, &value)?);
        }
        Ok(documents)
    }

    fn write_document(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        document: &Document,
    ) -> Result<(), StoreError> {
        let cf = self.documents_cf()?;
        let bytes = serde_json::to_vec(document)
            .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
        batch.put_cf(cf, encode_document_key(collection, &document.id), bytes);
        Ok(())
    }

    fn commit(&mut self, mut batch: WriteBatch, writes: u64) -> Result<(), StoreError> {
        let total = self.writes + writes;
        let metadata_cf = self
            .db
            .cf_handle(CF_METADATA)
            .ok_or_else(|| StoreError::Unavailable("missing metadata column family".to_string()))?;
        let bytes =
            bincode::serialize(&total).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        batch.put_cf(metadata_cf, KEY_WRITES, bytes);
        self.db.write(batch)?;
        self.writes = total;
        Ok(())
    }

    fn cache_put(&self, collection: &str, document: &Document) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                (collection.to_string(), document.id.clone()),
                document.clone(),
            );
        }
    }
}

impl DocumentStore for PersistentStore {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .scan(collection)?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .scan(collection)?
            .iter()
            .filter(|doc| filter.matches(doc))
            .count())
    }

    fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let cache_key = (collection.to_string(), id.clone());
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(document) = cache.get(&cache_key) {
                return Ok(Some(document.clone()));
            }
        }

        let cf = self.documents_cf()?;
        let key = encode_document_key(collection, id);
        let Some(bytes) = self.db.get_cf(cf, &key)? else {
            return Ok(None);
        };
        let document = decode_document(collection, &key, &bytes)?;
        self.cache_put(collection, &document);
        Ok(Some(document))
    }

    fn update_one(
        &mut self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
        expected_version: Option<u64>,
    ) -> Result<bool, StoreError> {
        let Some(mut document) = self.get(collection, id)? else {
            return Ok(false);
        };
        if let Some(expected) = expected_version {
            if document.version != expected {
                return Err(StoreError::VersionConflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    expected,
                    found: document.version,
                });
            }
        }
        if update.apply(&mut document) {
            document.version += 1;
            let mut batch = WriteBatch::default();
            self.write_document(&mut batch, collection, &document)?;
            self.commit(batch, 1)?;
            self.cache_put(collection, &document);
        }
        Ok(true)
    }

    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError> {
        let mut batch = WriteBatch::default();
        let mut changed = Vec::new();
        for mut document in self.scan(collection)? {
            if filter.matches(&document) && update.apply(&mut document) {
                document.version += 1;
                self.write_document(&mut batch, collection, &document)?;
                changed.push(document);
            }
        }
        if changed.is_empty() {
            return Ok(0);
        }
        self.commit(batch, changed.len() as u64)?;
        for document in &changed {
            self.cache_put(collection, document);
        }
        Ok(changed.len())
    }

    fn insert_one(
        &mut self,
        collection: &str,
        mut document: Document,
    ) -> Result<DocumentId, StoreError> {
        if self.get(collection, &document.id)?.is_some() {
            return Err(StoreError::DuplicateId {
                collection: collection.to_string(),
                id: document.id.to_string(),
            });
        }
        document.version = 1;
        let mut batch = WriteBatch::default();
        self.write_document(&mut batch, collection, &document)?;
        self.commit(batch, 1)?;
        self.cache_put(collection, &document);
        Ok(document.id)
    }

    fn metrics(&self) -> StoreMetrics {
        let documents = self
            .documents_cf()
            .map(|cf| self.db.iterator_cf(cf, IteratorMode::Start).count())
            .unwrap_or(0);
        StoreMetrics {
            documents,
            writes: self.writes,
        }
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn open_db(path: impl AsRef<Path>) -> Result<DB, StoreError> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<(), StoreError> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn encode_collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 1);
    key.extend_from_slice(collection.as_bytes());
    key.push(0);
    key
}

fn encode_document_key(collection: &str, id: &DocumentId) -> Vec<u8> {
    let mut key = encode_collection_prefix(collection);
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

fn decode_document(collection: &str, key: &[u8], value: &[u8]) -> Result<Document, StoreError> {
    serde_json::from_slice(value).map_err(|source| StoreError::Malformed {
        collection: collection.to_string(),
        id: String::from_utf8_lossy(&key[collection.len().min(key.len())..])
            .trim_start_matches('\0')
            .to_string(),
        source,
    })
}

fn validate_or_init_manifest(db: &DB) -> Result<(), StoreError> {
    if let Some(manifest) = load_metadata::<StorageManifest>(db, KEY_MANIFEST)? {
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(StoreError::Unavailable(format!(
                "storage format version mismatch: expected {}, found {}",
                STORAGE_FORMAT_VERSION, manifest.format_version
            )));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    save_metadata(db, KEY_MANIFEST, &manifest)
}

fn save_metadata<T: serde::Serialize>(db: &DB, key: &[u8], value: &T) -> Result<(), StoreError> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| StoreError::Unavailable("missing metadata column family".to_string()))?;
    let bytes =
        bincode::serialize(value).map_err(|err| StoreError::Unavailable(err.to_string()))?;
    db.put_cf(metadata_cf, key, bytes)?;
    Ok(())
}

fn load_metadata<T: serde::de::DeserializeOwned>(
    db: &DB,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| StoreError::Unavailable("missing metadata column family".to_string()))?;
    match db.get_cf(metadata_cf, key)? {
        Some(bytes) => bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Unavailable(err.to_string())),
        None => Ok(None),
    }
}
