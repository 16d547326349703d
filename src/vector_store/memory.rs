use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use super::{
    IndexRecord,
    IndexStatus,
    QueryMatch,
    VectorStore,
    check_dimension,
    cosine_similarity,
    top_k,
};
use crate::{config::Backend, error::Result};

/// Process-local vector index.
///
/// Nothing survives the process; callers rebuild it from the full document
/// set on every run. An index comes into existence on its first write and
/// takes its dimension from the first record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    indexes: HashMap<String, MemoryIndex>,
}

#[derive(Debug, Default)]
struct MemoryIndex {
    dimension: Option<usize>,
    records: BTreeMap<String, IndexRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids stored in `index`, sorted.
    pub fn ids(&self, index: &str) -> Vec<String> {
        self.indexes
            .get(index)
            .map(|idx| idx.records.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, index: &str) -> usize {
        self.indexes.get(index).map_or(0, |idx| idx.records.len())
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    pub fn get(&self, index: &str, id: &str) -> Option<&IndexRecord> {
        self.indexes.get(index)?.records.get(id)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn ensure_index(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<IndexStatus> {
        if self.indexes.contains_key(name) {
            return Ok(IndexStatus::AlreadyExists);
        }
        self.indexes.insert(name.to_string(), MemoryIndex {
            dimension: Some(dimension),
            records: BTreeMap::new(),
        });
        Ok(IndexStatus::Created)
    }

    async fn write_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        let entry = self.indexes.entry(index.to_string()).or_default();
        let dimension = match (entry.dimension, records.first()) {
            (Some(dim), _) => dim,
            (None, Some(first)) => first.values.len(),
            (None, None) => return Ok(()),
        };

        // Validate the whole batch before touching the index.
        for record in records {
            check_dimension(index, dimension, &record.values)?;
        }

        entry.dimension = Some(dimension);
        for record in records {
            entry.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let Some(idx) = self.indexes.get(index) else {
            return Ok(Vec::new());
        };
        if let Some(dim) = idx.dimension {
            check_dimension(index, dim, vector)?;
        }

        let matches = idx
            .records
            .values()
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: record.metadata.clone(),
            })
            .collect();
        Ok(top_k(matches, k))
    }
}
