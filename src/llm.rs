//! Language-model clients for answering from retrieved context.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Answers a question given a single block of stuffed context.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn answer_from_context(
        &self,
        context: &str,
        question: &str,
    ) -> Result<String>;
}

/// Build the "stuff" prompt: every context chunk in one prompt, then the
/// question.
pub fn stuff_prompt(context: &str, question: &str) -> String {
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try \
         to make up an answer.\n\n{context}\n\nQuestion: {question}\nHelpful Answer:"
    )
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        temperature: f32,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                Error::ConfigValidation("invalid OpenAI API key".into())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                Error::LanguageModel(format!(
                    "failed to build OpenAI HTTP client: {e}"
                ))
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn answer_from_context(
        &self,
        context: &str,
        question: &str,
    ) -> Result<String> {
        let prompt = stuff_prompt(context, question);
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        tracing::debug!(model = %self.model, "requesting chat completion");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::LanguageModel(format!(
                    "request to {} failed: {e}",
                    self.endpoint
                ))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::LanguageModel(format!(
                "chat completion returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            Error::LanguageModel(format!("failed to parse chat response: {e}"))
        })?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                Error::LanguageModel("chat response had no content".into())
            })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
