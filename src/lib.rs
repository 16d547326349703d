//! docqa - ask questions about a folder of documents.
//!
//! Documents are split into overlapping chunks, embedded through an
//! OpenAI-compatible embeddings API and stored in a vector index: a remote
//! [Pinecone](https://www.pinecone.io) index, a process-local in-memory
//! index, or an on-disk [redb](https://github.com/cberner/redb) database.
//! Questions are answered by retrieving the closest chunks and handing them
//! to a chat model as context.
//!
//! # Quick start
//!
//! ```no_run
//! use docqa::{Config, Settings, VectorStore};
//! use docqa::answer::Answerer;
//! use docqa::embedding::OpenAiEmbedder;
//! use docqa::llm::OpenAiChat;
//! use docqa::{indexing, loader, vector_store};
//!
//! # async fn run() -> docqa::Result<()> {
//! let config = Config::from_env()?;
//! let settings = Settings::default();
//!
//! let embedder = OpenAiEmbedder::new(
//!     &config.openai_api_key,
//!     &config.openai_base_url,
//!     &settings.embedding_model,
//!     settings.dimension,
//! )?;
//! let mut store = vector_store::open(&config, None)?;
//! store.initialize().await?;
//!
//! let docs = loader::load_documents(&settings.documents_dir, &settings.patterns)?;
//! indexing::index_documents(&mut *store, &embedder, &config.pinecone_index, &docs, &settings)
//!     .await?;
//!
//! let llm = OpenAiChat::new(
//!     &config.openai_api_key,
//!     &config.openai_base_url,
//!     &settings.chat_model,
//!     settings.temperature,
//! )?;
//! let answerer = Answerer {
//!     embedder: &embedder,
//!     store: &*store,
//!     llm: &llm,
//!     index: &config.pinecone_index,
//!     top_k: settings.top_k,
//! };
//! println!("{}", answerer.answer("What is this?").await?.text());
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod chunk_id;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod llm;
pub mod loader;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk_id::ChunkId;
pub use config::{Config, Settings};
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use vector_store::VectorStore;
