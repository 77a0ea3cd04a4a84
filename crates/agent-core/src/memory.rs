//! Vector Memory
//!
//! Stores textual experiences alongside their embeddings and retrieves the
//! entries most similar to a query. Embedding is delegated to an [`Embedder`],
//! storage and ranking to a [`MemoryStore`]; [`VectorMemory`] enforces the
//! collection invariants on top of both:
//!
//! - every stored vector has the collection dimension (mismatch is a hard error)
//! - the distance metric is fixed for the lifetime of the instance
//! - results are ordered by descending similarity, newest first on ties

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::MemorySettings;
use crate::error::{AgentError, Result};
use crate::provider::Embedder;

/// Scalar metadata value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Entry metadata, arbitrary keys
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key added to every entry
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Result count used when callers have no preference
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// A stored unit of memory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Insertion order within the collection, used to break ties
    pub sequence: u64,
}

/// An entry with its similarity to a query
#[derive(Clone, Debug)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

/// Similarity measure for a collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    DotProduct,
    /// Reported as `1 / (1 + distance)` so larger is always more similar
    Euclidean,
}

impl DistanceMetric {
    /// Similarity of two equal-length vectors; larger means closer
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Cosine => {
                let norm_a = dot(a, a).sqrt();
                let norm_b = dot(b, b).sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot(a, b) / (norm_a * norm_b)
                }
            }
            DistanceMetric::DotProduct => dot(a, b),
            DistanceMetric::Euclidean => {
                let distance = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Backing storage and similarity ranking for one collection
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, entry: MemoryEntry) -> Result<()>;

    /// Up to `limit` entries, by descending similarity then descending sequence
    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>>;

    /// Id of an entry with exactly this text
    async fn find_text(&self, text: &str) -> Result<Option<Uuid>>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    /// First insertion sequence not used by an entry loaded at open
    fn next_sequence(&self) -> u64 {
        0
    }
}

/// Brute-force in-process store
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
    next_sequence: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with previously saved entries
    pub fn with_entries(entries: Vec<MemoryEntry>) -> Self {
        let next_sequence = entries
            .iter()
            .map(|e| e.sequence.saturating_add(1))
            .max()
            .unwrap_or(0);
        Self {
            entries: RwLock::new(entries),
            next_sequence,
        }
    }

    /// Copy of every entry in insertion order
    pub async fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, entry: MemoryEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredEntry> = entries
            .iter()
            .filter(|e| e.embedding.len() == query.len())
            .map(|e| ScoredEntry {
                similarity: metric.similarity(query, &e.embedding),
                entry: e.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.entry.sequence.cmp(&a.entry.sequence))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn find_text(&self, text: &str) -> Result<Option<Uuid>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.text == text)
            .map(|e| e.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

/// A collection of embedded texts
pub struct VectorMemory {
    collection: String,
    dimension: usize,
    metric: DistanceMetric,
    deduplicate: bool,
    embed_timeout: Duration,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn MemoryStore>,
    sequence: AtomicU64,
}

impl VectorMemory {
    /// Open a collection; the embedder must produce `settings.dimension` vectors
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn MemoryStore>,
        settings: &MemorySettings,
    ) -> Result<Self> {
        if settings.dimension == 0 {
            return Err(AgentError::Config("memory dimension must be positive".into()));
        }
        if embedder.dimension() != settings.dimension {
            return Err(AgentError::Config(format!(
                "embedder produces {}-dimensional vectors but collection '{}' is {}-dimensional",
                embedder.dimension(),
                settings.collection,
                settings.dimension
            )));
        }

        let next_sequence = store.next_sequence();
        tracing::info!(
            collection = %settings.collection,
            dimension = settings.dimension,
            metric = ?settings.metric,
            "Opened memory collection"
        );

        Ok(Self {
            collection: settings.collection.clone(),
            dimension: settings.dimension,
            metric: settings.metric,
            deduplicate: settings.deduplicate,
            embed_timeout: settings.embedding_timeout(),
            embedder,
            store,
            sequence: AtomicU64::new(next_sequence),
        })
    }

    /// In-process collection with the given embedder
    pub fn in_memory(embedder: Arc<dyn Embedder>, settings: &MemorySettings) -> Result<Self> {
        Self::new(embedder, Arc::new(InMemoryStore::new()), settings)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Embed and store `text`; returns the entry id
    ///
    /// With deduplication enabled an existing entry with identical text is
    /// returned instead of storing a new one.
    pub async fn add(&self, text: &str, metadata: Option<Metadata>) -> Result<Uuid> {
        if self.deduplicate {
            if let Some(existing) = self.store.find_text(text).await? {
                tracing::debug!(collection = %self.collection, id = %existing, "Skipping duplicate memory");
                return Ok(existing);
            }
        }

        let embedding = self.embed(text).await?;

        let mut metadata = metadata.unwrap_or_default();
        let created_at = Utc::now();
        metadata
            .entry(TIMESTAMP_KEY.to_string())
            .or_insert_with(|| MetadataValue::Text(created_at.to_rfc3339()));

        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            text: text.to_string(),
            metadata,
            embedding,
            created_at,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        let id = entry.id;

        self.store.insert(entry).await?;
        tracing::debug!(collection = %self.collection, id = %id, "Stored memory");
        Ok(id)
    }

    /// Texts most similar to `query`, best first, without duplicates
    ///
    /// The candidate window doubles until `limit` distinct texts are found or
    /// the store runs out, so repeated texts never crowd out other results.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 || self.store.len().await? == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed(query).await?;
        let mut window = limit.saturating_mul(2);
        loop {
            let hits = self.store.nearest(&embedding, self.metric, window).await?;
            let exhausted = hits.len() < window;

            let mut seen = HashSet::new();
            let texts: Vec<String> = hits
                .into_iter()
                .map(|hit| hit.entry.text)
                .filter(|text| seen.insert(text.clone()))
                .take(limit)
                .collect();

            if texts.len() == limit || exhausted || window == usize::MAX {
                return Ok(texts);
            }
            window = window.saturating_mul(2);
        }
    }

    /// Entries most similar to `query` with their similarity
    pub async fn search_scored(&self, query: &str, limit: usize) -> Result<Vec<ScoredEntry>> {
        if limit == 0 || self.store.len().await? == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed(query).await?;
        self.store.nearest(&embedding, self.metric, limit).await
    }

    /// Remove one entry; false if it did not exist
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.store.delete(id).await
    }

    /// Remove every entry. Irreversible.
    pub async fn clear(&self) -> Result<()> {
        tracing::info!(collection = %self.collection, "Clearing memory collection");
        self.store.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AgentError::Embedding("cannot embed empty text".into()));
        }

        let embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| {
                AgentError::Embedding(format!(
                    "embedding exceeded {}s",
                    self.embed_timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| match e {
                e if e.is_embedding() => e,
                other => AgentError::Embedding(other.to_string()),
            })?;

        if embedding.len() != self.dimension {
            return Err(AgentError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

/// Deterministic local embedder based on feature hashing
///
/// Lower-cased alphanumeric words are hashed into signed buckets and the
/// result is L2-normalised. Texts sharing words land close together, which is
/// enough for offline use and tests; it carries no semantic knowledge.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            let trimmed = lowered.trim();
            if trimmed.is_empty() {
                return Err(AgentError::Embedding("cannot embed empty text".into()));
            }
            tokens.push(trimmed);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}
