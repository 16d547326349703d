use std::path::{Path, PathBuf};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{
    IndexRecord,
    IndexStatus,
    QueryMatch,
    RecordMetadata,
    VectorStore,
    check_dimension,
    cosine_similarity,
    top_k,
};
use crate::{
    config::Backend,
    error::{Error, Result},
};

/// Index name -> vector dimension.
const INDEXES: TableDefinition<&str, u64> = TableDefinition::new("indexes");

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

fn records_table(index: &str) -> String {
    format!("records:{index}")
}

/// Vector index persisted in a redb file.
///
/// Each index lives in its own `records:{name}` table keyed by record id.
/// Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values in native byte order
/// - remaining bytes: JSON-encoded [`RecordMetadata`]
pub struct RedbStore {
    path: PathBuf,
    db: Option<Database>,
}

impl RedbStore {
    /// Create a store backed by `path`. The file is opened by
    /// [`VectorStore::initialize`].
    pub fn new(path: PathBuf) -> Self {
        Self { path, db: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self) -> Result<&Database> {
        self.db.as_ref().ok_or_else(|| Error::Connection {
            backend: "persistent",
            message: format!(
                "store at {} used before initialize",
                self.path.display()
            ),
        })
    }

    /// Dimension of `index`, or `None` if it was never created.
    pub fn dimension(&self, index: &str) -> Result<Option<usize>> {
        let txn = self.db()?.begin_read()?;
        let table = txn.open_table(INDEXES)?;
        Ok(table.get(index)?.map(|v| v.value() as usize))
    }

    /// List all record ids stored in `index`, sorted.
    pub fn ids(&self, index: &str) -> Result<Vec<String>> {
        if self.dimension(index)?.is_none() {
            return Ok(Vec::new());
        }
        let name = records_table(index);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db()?.begin_read()?;
        let table = txn.open_table(def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    /// Load a single record.
    pub fn get(&self, index: &str, id: &str) -> Result<Option<IndexRecord>> {
        if self.dimension(index)?.is_none() {
            return Ok(None);
        }
        let name = records_table(index);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db()?.begin_read()?;
        let table = txn.open_table(def)?;
        let Some(guard) = table.get(id)? else {
            return Ok(None);
        };
        Ok(decode(id, guard.value()))
    }
}

fn encode(record: &IndexRecord) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec(&record.metadata).map_err(|e| {
        Error::Backend {
            backend: "persistent",
            message: format!("failed to encode metadata for {}: {e}", record.id),
        }
    })?;
    let dimension = record.values.len() as u32;

    let mut bytes = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(record.values.as_slice()) + metadata.len(),
    );
    bytes.extend_from_slice(&dimension.to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(&record.values));
    bytes.extend_from_slice(&metadata);
    Ok(bytes)
}

/// Decode a stored entry. Returns `None` for truncated or corrupt entries.
fn decode(id: &str, bytes: &[u8]) -> Option<IndexRecord> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let vector_end = HEADER_SIZE + dimension * 4;
    let vector_bytes = bytes.get(HEADER_SIZE..vector_end)?;

    let values = vector_bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();
    let metadata: RecordMetadata =
        serde_json::from_slice(&bytes[vector_end..]).ok()?;

    Some(IndexRecord {
        id: id.to_string(),
        values,
        metadata,
    })
}

#[async_trait]
impl VectorStore for RedbStore {
    fn backend(&self) -> Backend {
        Backend::Persistent
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }
        let connection_error = |message: String| Error::Connection {
            backend: "persistent",
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                connection_error(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let db = Database::create(&self.path).map_err(|e| {
            connection_error(format!(
                "cannot open {}: {e}",
                self.path.display()
            ))
        })?;

        let txn = db.begin_write()?;
        txn.open_table(INDEXES)?;
        txn.commit()?;

        tracing::debug!(path = %self.path.display(), "opened vector database");
        self.db = Some(db);
        Ok(())
    }

    async fn ensure_index(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<IndexStatus> {
        tracing::info!(index = name, "creating index");
        let txn = self.db()?.begin_write()?;
        let status = {
            let mut indexes = txn.open_table(INDEXES)?;
            let existing = indexes.get(name)?.map(|v| v.value() as usize);
            match existing {
                Some(dim) if dim != dimension => {
                    return Err(Error::IndexCreation {
                        index: name.to_string(),
                        message: format!(
                            "index exists with dimension {dim}, requested {dimension}"
                        ),
                    });
                }
                Some(_) => IndexStatus::AlreadyExists,
                None => {
                    indexes.insert(name, dimension as u64)?;
                    let table = records_table(name);
                    txn.open_table(TableDefinition::<&str, &[u8]>::new(&table))?;
                    IndexStatus::Created
                }
            }
        };
        txn.commit()?;

        match status {
            IndexStatus::Created => {
                tracing::info!(index = name, dimension, "created index")
            }
            IndexStatus::AlreadyExists => {
                tracing::info!(index = name, "index already exists")
            }
        }
        Ok(status)
    }

    async fn write_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let dimension =
            self.dimension(index)?.ok_or_else(|| Error::NotFound {
                kind: "index",
                name: index.to_string(),
            })?;
        let encoded = records
            .iter()
            .map(|record| {
                check_dimension(index, dimension, &record.values)?;
                Ok((record.id.as_str(), encode(record)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let name = records_table(index);
        let txn = self.db()?.begin_write()?;
        {
            let mut table =
                txn.open_table(TableDefinition::<&str, &[u8]>::new(&name))?;
            for (id, bytes) in &encoded {
                table.insert(*id, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let query_error = |e: Error| Error::QueryService {
            index: index.to_string(),
            message: e.to_string(),
        };

        let Some(dimension) = self.dimension(index).map_err(query_error)? else {
            return Ok(Vec::new());
        };
        check_dimension(index, dimension, vector)?;

        let name = records_table(index);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let scan = || -> Result<Vec<QueryMatch>> {
            let txn = self.db()?.begin_read()?;
            let table = txn.open_table(def)?;
            let mut matches = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let id = key.value();
                let Some(record) = decode(id, value.value()) else {
                    tracing::warn!(index, id, "skipping corrupt record");
                    continue;
                };
                matches.push(QueryMatch {
                    id: record.id,
                    score: cosine_similarity(vector, &record.values),
                    metadata: record.metadata,
                });
            }
            Ok(matches)
        };

        Ok(top_k(scan().map_err(query_error)?, k))
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record_with_values;

    async fn test_store() -> (tempfile::TempDir, RedbStore) {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = RedbStore::new(tmp.path().join("vectors.redb"));
        store.initialize().await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn store_and_load() {
        let (_tmp, mut store) = test_store().await;
        store.ensure_index("idx", 3).await.unwrap();

        let record = record_with_values("a.md-0", vec![0.1, 0.2, 0.3]);
        store.write_batch("idx", &[record.clone()]).await.unwrap();

        assert_eq!(store.get("idx", "a.md-0").unwrap(), Some(record));
        assert!(store.get("idx", "a.md-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn ensure_index_twice_creates_once() {
        let (_tmp, mut store) = test_store().await;
        assert_eq!(
            store.ensure_index("idx", 3).await.unwrap(),
            IndexStatus::Created
        );
        assert_eq!(
            store.ensure_index("idx", 3).await.unwrap(),
            IndexStatus::AlreadyExists
        );
        assert_eq!(store.dimension("idx").unwrap(), Some(3));
    }

    #[tokio::test]
    async fn ensure_index_rejects_dimension_change() {
        let (_tmp, mut store) = test_store().await;
        store.ensure_index("idx", 3).await.unwrap();
        let err = store.ensure_index("idx", 4).await.unwrap_err();
        assert!(matches!(err, Error::IndexCreation { .. }));
    }

    #[tokio::test]
    async fn write_to_missing_index_fails() {
        let (_tmp, mut store) = test_store().await;
        let err = store
            .write_batch("nope", &[record_with_values("a.md-0", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "index", .. }));
    }

    #[tokio::test]
    async fn overwrite_entry() {
        let (_tmp, mut store) = test_store().await;
        store.ensure_index("idx", 2).await.unwrap();
        store
            .write_batch("idx", &[record_with_values("a.md-0", vec![1.0, 2.0])])
            .await
            .unwrap();
        store
            .write_batch("idx", &[record_with_values("a.md-0", vec![3.0, 4.0])])
            .await
            .unwrap();

        assert_eq!(store.ids("idx").unwrap(), vec!["a.md-0"]);
        let record = store.get("idx", "a.md-0").unwrap().unwrap();
        assert_eq!(record.values, vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn query_ranks_and_returns_metadata() {
        let (_tmp, mut store) = test_store().await;
        store.ensure_index("idx", 2).await.unwrap();
        store
            .write_batch("idx", &[
                record_with_values("a.md-0", vec![1.0, 0.0]),
                record_with_values("b.md-0", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = store.query("idx", &[0.1, 1.0], 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b.md-0");
        assert_eq!(matches[0].metadata.source_path, "b.md");
        assert!(!matches[0].metadata.page_content.is_empty());
    }

    #[tokio::test]
    async fn query_empty_or_missing_index() {
        let (_tmp, mut store) = test_store().await;
        assert!(store.query("nope", &[1.0], 3).await.unwrap().is_empty());

        store.ensure_index("idx", 2).await.unwrap();
        assert!(store.query("idx", &[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn use_before_initialize_is_connection_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = RedbStore::new(tmp.path().join("vectors.redb"));
        let err = store.ensure_index("idx", 2).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");

        {
            let mut store = RedbStore::new(path.clone());
            store.initialize().await.unwrap();
            store.ensure_index("idx", 2).await.unwrap();
            store
                .write_batch("idx", &[record_with_values("a.md-0", vec![1.0, 2.0])])
                .await
                .unwrap();
        }

        {
            let mut store = RedbStore::new(path);
            store.initialize().await.unwrap();
            let record = store.get("idx", "a.md-0").unwrap().unwrap();
            assert_eq!(record.values, vec![1.0, 2.0]);
        }
    }

    #[test]
    fn decode_rejects_truncated_entries() {
        let record = record_with_values("a.md-0", vec![1.0, 2.0]);
        let bytes = encode(&record).unwrap();
        assert_eq!(decode("a.md-0", &bytes), Some(record));
        assert!(decode("a.md-0", &bytes[..6]).is_none());
        assert!(decode("a.md-0", &bytes[..2]).is_none());
    }
}
