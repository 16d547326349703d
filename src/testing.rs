//! In-process fakes shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    chunk_id::ChunkId,
    config::Backend,
    embedding::Embedder,
    error::{Error, Result},
    llm::LanguageModel,
    vector_store::{
        IndexRecord,
        IndexStatus,
        MemoryStore,
        QueryMatch,
        RecordMetadata,
        VectorStore,
    },
};

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed into one of `dimension` buckets and the
/// result is L2-normalized, so texts sharing words score higher.
pub struct HashEmbedder {
    dimension: usize,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimension;
            values[bucket] += 1.0;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().unwrap().push(texts.to_vec());
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Language model that answers with a fixed string and records every
/// prompt it was given.
pub struct FakeLlm {
    answer: String,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl FakeLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_context(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .map(|(context, _)| context.clone())
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn answer_from_context(
        &self,
        context: &str,
        question: &str,
    ) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((context.to_string(), question.to_string()));
        Ok(self.answer.clone())
    }
}

/// [`MemoryStore`] wrapper that records calls and can fail on demand.
pub struct RecordingStore {
    backend: Backend,
    pub inner: MemoryStore,
    /// Ids of every successful write call, in order.
    pub write_calls: Vec<Vec<String>>,
    pub ensure_calls: Vec<(String, usize)>,
    /// Fail the nth write call (1-based).
    pub fail_on_write: Option<usize>,
    attempts: usize,
}

impl RecordingStore {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            inner: MemoryStore::new(),
            write_calls: Vec::new(),
            ensure_calls: Vec::new(),
            fail_on_write: None,
            attempts: 0,
        }
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn ensure_index(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<IndexStatus> {
        self.ensure_calls.push((name.to_string(), dimension));
        self.inner.ensure_index(name, dimension).await
    }

    async fn write_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        self.attempts += 1;
        if self.fail_on_write == Some(self.attempts) {
            return Err(Error::Backend {
                backend: "recording",
                message: format!("injected failure on write {}", self.attempts),
            });
        }
        self.inner.write_batch(index, records).await?;
        self.write_calls
            .push(records.iter().map(|r| r.id.clone()).collect());
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        self.inner.query(index, vector, top_k).await
    }
}

/// A record with `dim` constant values whose metadata is derived from `id`.
pub fn record(id: &str, dim: usize) -> IndexRecord {
    record_with_values(id, vec![1.0; dim])
}

pub fn record_with_values(id: &str, values: Vec<f32>) -> IndexRecord {
    let (source_path, chunk_ordinal) = match ChunkId::parse(id) {
        Some(chunk_id) => (chunk_id.source_path, chunk_id.ordinal),
        None => (id.to_string(), 0),
    };
    IndexRecord {
        id: id.to_string(),
        values,
        metadata: RecordMetadata {
            page_content: format!("content of {id}"),
            loc: r#"{"lines":{"from":1,"to":1}}"#.to_string(),
            source_path,
            chunk_ordinal,
        },
    }
}
