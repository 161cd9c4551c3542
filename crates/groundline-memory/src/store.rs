use chrono::{DateTime, TimeZone, Utc};
use groundline_core::{GroundingError, GroundingResult};
use parking_lot::RwLock as RegistryLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, validate_vector};

/// A single record stored in a collection.
///
/// Records are immutable once inserted; only their access counters change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Create a record with a fresh random id.
    pub fn new(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text, vector)
    }

    /// Create a record with an explicit id.
    pub fn with_id(id: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vector,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata value. Chainable builder method.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Access counters of a record, as of the moment they were read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// A record returned by a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<Record>,
    pub score: f32,
}

/// Parameters of [`Collection::find_similar`].
#[derive(Debug, Clone, Copy)]
pub struct SimilarityQuery {
    pub limit: usize,
    pub score_threshold: f32,
}

impl Default for SimilarityQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: 0.0,
        }
    }
}

/// Stored record plus its mutable counters.
#[derive(Debug)]
struct Entry {
    record: Arc<Record>,
    access_count: AtomicU64,
    /// Milliseconds since the epoch; 0 means never accessed.
    last_accessed_ms: AtomicI64,
}

impl Entry {
    fn new(record: Record, stats: AccessStats) -> Self {
        Self {
            record: Arc::new(record),
            access_count: AtomicU64::new(stats.access_count),
            last_accessed_ms: AtomicI64::new(
                stats.last_accessed.map_or(0, |t| t.timestamp_millis()),
            ),
        }
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn stats(&self) -> AccessStats {
        let ms = self.last_accessed_ms.load(Ordering::Relaxed);
        AccessStats {
            access_count: self.access_count.load(Ordering::Relaxed),
            last_accessed: if ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(ms).single()
            },
        }
    }
}

#[derive(Debug, Default)]
struct CollectionInner {
    entries: Vec<Arc<Entry>>,
    ids: HashMap<String, usize>,
    dimension: Option<usize>,
}

/// A named set of records keyed by unique id.
///
/// Reads share the lock and never wait on each other; inserts take the
/// write lock, so writers to one collection are serialized while other
/// collections stay independent.
#[derive(Debug)]
pub struct Collection {
    name: String,
    inner: RwLock<CollectionInner>,
}

impl Collection {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(CollectionInner::default()),
        }
    }

    /// Name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a record. Fails on a duplicate id, an empty or non-finite
    /// vector, or a vector whose dimension differs from the collection's.
    pub async fn insert(&self, record: Record) -> GroundingResult<()> {
        self.insert_with_stats(record, AccessStats::default()).await
    }

    pub(crate) async fn insert_with_stats(
        &self,
        record: Record,
        stats: AccessStats,
    ) -> GroundingResult<()> {
        if record.vector.is_empty() {
            return Err(GroundingError::Store(format!(
                "record '{}' has an empty vector",
                record.id
            )));
        }
        validate_vector(&record.vector)?;

        let mut inner = self.inner.write().await;
        if inner.ids.contains_key(&record.id) {
            return Err(GroundingError::Store(format!(
                "duplicate id '{}' in collection '{}'",
                record.id, self.name
            )));
        }
        match inner.dimension {
            Some(dim) if dim != record.vector.len() => {
                return Err(GroundingError::Store(format!(
                    "collection '{}' expects dimension {dim}, got {}",
                    self.name,
                    record.vector.len()
                )));
            }
            Some(_) => {}
            None => inner.dimension = Some(record.vector.len()),
        }

        let position = inner.entries.len();
        inner.ids.insert(record.id.clone(), position);
        inner.entries.push(Arc::new(Entry::new(record, stats)));
        Ok(())
    }

    /// Top `limit` records by descending cosine similarity, dropping scores
    /// below `score_threshold`. Ties keep insertion order. Returned records
    /// have their access counters bumped.
    pub async fn find_similar(
        &self,
        vector: &[f32],
        query: SimilarityQuery,
    ) -> GroundingResult<Vec<ScoredRecord>> {
        if vector.is_empty() {
            return Err(GroundingError::Store("Empty query vector".to_string()));
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(Arc<Entry>, f32)> = inner
            .entries
            .iter()
            .map(|e| (Arc::clone(e), cosine_similarity(vector, &e.record.vector)))
            .filter(|(_, score)| *score >= query.score_threshold)
            .collect();
        drop(inner);

        // Stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.limit);

        let now = Utc::now();
        Ok(scored
            .into_iter()
            .map(|(entry, score)| {
                entry.touch(now);
                ScoredRecord {
                    record: Arc::clone(&entry.record),
                    score,
                }
            })
            .collect())
    }

    /// All records in insertion order.
    pub async fn records(&self) -> Vec<Arc<Record>> {
        let inner = self.inner.read().await;
        inner.entries.iter().map(|e| Arc::clone(&e.record)).collect()
    }

    /// All records with their access counters, in insertion order.
    pub async fn records_with_stats(&self) -> Vec<(Arc<Record>, AccessStats)> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|e| (Arc::clone(&e.record), e.stats()))
            .collect()
    }

    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> Option<Arc<Record>> {
        let inner = self.inner.read().await;
        inner
            .ids
            .get(id)
            .map(|&i| Arc::clone(&inner.entries[i].record))
    }

    /// Access counters of a record.
    pub async fn access_stats(&self, id: &str) -> Option<AccessStats> {
        let inner = self.inner.read().await;
        inner.ids.get(id).map(|&i| inner.entries[i].stats())
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// `true` if the collection holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Dimension fixed by the first inserted record.
    pub async fn dimension(&self) -> Option<usize> {
        self.inner.read().await.dimension
    }
}

/// In-memory vector store: a registry of named [`Collection`]s.
///
/// Brute-force cosine similarity is used; this is sized for a few thousand
/// short records in a single process.
#[derive(Debug, Default)]
pub struct VectorStore {
    collections: RegistryLock<BTreeMap<String, Arc<Collection>>>,
}

impl VectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a collection, creating it on first reference.
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.read().get(name) {
            return Arc::clone(existing);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Collection::new(name))),
        )
    }

    /// Get a collection only if it already exists.
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Insert a record into the named collection.
    pub async fn insert(&self, collection: &str, record: Record) -> GroundingResult<()> {
        self.collection(collection).insert(record).await
    }

    /// Similarity search within one collection.
    pub async fn find_similar(
        &self,
        collection: &str,
        vector: &[f32],
        query: SimilarityQuery,
    ) -> GroundingResult<Vec<ScoredRecord>> {
        self.collection(collection).find_similar(vector, query).await
    }
}
