//! Index-time pipeline: documents to chunks to embeddings to stored records.
//!
//! Documents are processed one at a time. All chunks of a document go to
//! the embedder in a single call and are then written through
//! [`VectorStore::upsert_batch`]. Chunk ids are stable, so running the
//! pipeline twice over the same documents overwrites rather than
//! duplicates.

use crate::{
    chunking::{self, Chunk},
    config::Settings,
    embedding::Embedder,
    error::{Error, Result},
    loader::Document,
    vector_store::{IndexRecord, IndexStatus, UpsertSummary, VectorStore},
};

/// What one indexing run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub records: usize,
    /// Store write calls issued.
    pub batches: usize,
    /// `None` for backends without a separate create-index step.
    pub index_status: Option<IndexStatus>,
}

/// Chunk, embed and upsert `documents` into `index`.
///
/// The store must already be initialized. The first failing embedding call
/// or batch aborts the run.
pub async fn index_documents(
    store: &mut dyn VectorStore,
    embedder: &dyn Embedder,
    index: &str,
    documents: &[Document],
    settings: &Settings,
) -> Result<IndexReport> {
    let mut report = IndexReport::default();

    if store.backend().provisions_indexes() {
        report.index_status =
            Some(store.ensure_index(index, embedder.dimension()).await?);
    }

    for document in documents {
        report.documents += 1;
        let source = document.metadata.source.as_str();
        let chunks: Vec<Chunk> =
            chunking::chunks(document, settings.chunking).collect();
        if chunks.is_empty() {
            tracing::debug!(source, "document has no content, skipping");
            continue;
        }

        tracing::info!(source, chunks = chunks.len(), "adding chunks to index");
        let summary = index_chunks(store, embedder, index, &chunks, settings)
            .await
            .map_err(|e| Error::Document {
                source_path: source.to_string(),
                source: Box::new(e),
            })?;
        tracing::debug!(source, batches = summary.batches, "indexed document");

        report.chunks += chunks.len();
        report.records += summary.records;
        report.batches += summary.batches;
    }

    tracing::info!(
        index,
        documents = report.documents,
        chunks = report.chunks,
        batches = report.batches,
        "indexing complete"
    );
    Ok(report)
}

/// Embed one document's chunks in a single call and upsert the records.
async fn index_chunks(
    store: &mut dyn VectorStore,
    embedder: &dyn Embedder,
    index: &str,
    chunks: &[Chunk],
    settings: &Settings,
) -> Result<UpsertSummary> {
    let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
    let vectors = embedder.embed_batch(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(Error::EmbeddingService(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            vectors.len()
        )));
    }

    let records: Vec<IndexRecord> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, values)| IndexRecord::from_chunk(chunk, values))
        .collect();
    store.upsert_batch(index, &records, settings.batch_size).await
}
