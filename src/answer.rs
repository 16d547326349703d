//! Query-time orchestration: retrieve similar chunks and ask the language
//! model to answer from them.

use crate::{
    embedding::Embedder,
    error::Result,
    llm::LanguageModel,
    vector_store::{QueryMatch, VectorStore},
};

/// Result of answering one question.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// The index returned nothing; the language model was not called.
    NoMatches,
    Synthesized {
        text: String,
        /// Retrieved chunks in rank order.
        matches: Vec<QueryMatch>,
    },
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Self::NoMatches => "No matches found.",
            Self::Synthesized { text, .. } => text,
        }
    }

    pub fn matches(&self) -> &[QueryMatch] {
        match self {
            Self::NoMatches => &[],
            Self::Synthesized { matches, .. } => matches,
        }
    }
}

pub struct Answerer<'a> {
    pub embedder: &'a dyn Embedder,
    pub store: &'a dyn VectorStore,
    pub llm: &'a dyn LanguageModel,
    pub index: &'a str,
    pub top_k: usize,
}

impl Answerer<'_> {
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let vector = self.embedder.embed_one(question).await?;
        let matches = self.store.query(self.index, &vector, self.top_k).await?;
        tracing::debug!(index = self.index, matches = matches.len(), "retrieved context");

        if matches.is_empty() {
            tracing::info!(index = self.index, "no matches found");
            return Ok(Answer::NoMatches);
        }

        let context = join_context(&matches);
        let text = self.llm.answer_from_context(&context, question).await?;
        Ok(Answer::Synthesized { text, matches })
    }
}

/// Chunk texts in rank order, separated by single spaces.
pub fn join_context(matches: &[QueryMatch]) -> String {
    matches
        .iter()
        .map(|m| m.metadata.page_content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
