//! Vector store backends.
//!
//! Every backend implements [`VectorStore`]. The concrete variant is picked
//! once at startup by [`open`] from the validated [`Config`]; the indexing
//! and answering code only ever sees `dyn VectorStore`.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};

use crate::{
    chunking::Chunk,
    config::{Backend, Config},
    data_dir::DataDir,
    error::{Error, Result},
};

pub mod memory;
pub mod pinecone;
pub mod redb_store;

pub use memory::MemoryStore;
pub use pinecone::{PineconeSettings, PineconeStore};
pub use redb_store::RedbStore;

/// Stored alongside every vector so answers can be built without a second
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub source_path: String,
    #[serde(deserialize_with = "ordinal_from_number")]
    pub chunk_ordinal: usize,
    /// JSON-encoded [`ChunkLocation`](crate::chunking::ChunkLocation).
    pub loc: String,
    pub page_content: String,
}

/// Some services hand integer metadata back as floats.
fn ordinal_from_number<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(D::Error::custom(format!("invalid chunk ordinal: {value}")))
    }
}

/// The unit persisted to a vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl IndexRecord {
    pub fn from_chunk(chunk: &Chunk, values: Vec<f32>) -> Self {
        Self {
            id: chunk.id().to_string(),
            values,
            metadata: RecordMetadata {
                source_path: chunk.source_path.clone(),
                chunk_ordinal: chunk.index,
                loc: serde_json::to_string(&chunk.location)
                    .unwrap_or_default(),
                page_content: chunk.text.clone(),
            },
        }
    }
}

/// A similarity hit, highest score first in every result list.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Outcome of [`VectorStore::ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub records: usize,
    /// Number of write calls issued.
    pub batches: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> Backend;

    /// Establish connection or session state.
    async fn initialize(&mut self) -> Result<()>;

    /// Create the index if it does not exist. Existing indexes are left as
    /// they are.
    async fn ensure_index(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<IndexStatus>;

    /// Write one batch atomically, replacing records with the same id.
    async fn write_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<()>;

    /// Up to `top_k` nearest records by cosine similarity.
    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>>;

    /// Write `records` in consecutive batches of at most `batch_size`.
    ///
    /// Issues exactly `ceil(records.len() / batch_size)` write calls. The
    /// first failing batch aborts the upsert with [`Error::Upsert`] carrying
    /// that batch's record range.
    async fn upsert_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
        batch_size: usize,
    ) -> Result<UpsertSummary> {
        let batch_size = batch_size.max(1);
        let mut summary = UpsertSummary::default();

        for (n, batch) in records.chunks(batch_size).enumerate() {
            let start = n * batch_size;
            let end = start + batch.len();
            self.write_batch(index, batch).await.map_err(|e| Error::Upsert {
                index: index.to_string(),
                start,
                end,
                source: Box::new(e),
            })?;
            tracing::debug!(index, start, end, "wrote batch");
            summary.records += batch.len();
            summary.batches += 1;
        }

        Ok(summary)
    }
}

/// Build the configured backend. Nothing is contacted until
/// [`VectorStore::initialize`].
///
/// `data_dir` overrides where the persistent backend keeps its file.
pub fn open(
    config: &Config,
    data_dir: Option<&Path>,
) -> Result<Box<dyn VectorStore>> {
    let store: Box<dyn VectorStore> = match config.backend {
        Backend::Pinecone => {
            Box::new(PineconeStore::new(PineconeSettings::from_config(config))?)
        }
        Backend::Memory => Box::new(MemoryStore::new()),
        Backend::Persistent => {
            let data_dir = DataDir::resolve(data_dir)?;
            Box::new(RedbStore::new(data_dir.vectors_db()))
        }
    };
    tracing::debug!(backend = %config.backend, "selected vector store");
    Ok(store)
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Sort by score descending (ties by id) and keep the first `top_k`.
pub(crate) fn top_k(mut matches: Vec<QueryMatch>, top_k: usize) -> Vec<QueryMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(top_k);
    matches
}

/// Reject vectors whose length differs from the index dimension.
pub(crate) fn check_dimension(
    index: &str,
    expected: usize,
    vector: &[f32],
) -> Result<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            index: index.to_string(),
            expected,
            actual: vector.len(),
        })
    }
}
