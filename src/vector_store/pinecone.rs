//! Pinecone-backed vector store.
//!
//! Index lifecycle calls go to the environment's controller
//! (`/actions/whoami`, `/databases`); record reads and writes go to the
//! index host (`/vectors/upsert`, `/query`). Index creation is asynchronous
//! on the server, so [`PineconeStore::ensure_index`] polls the index
//! description until it reports ready.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};

use super::{IndexRecord, IndexStatus, QueryMatch, RecordMetadata, VectorStore};
use crate::{
    config::{Backend, Config},
    error::{Error, Result},
};

const BACKEND: &str = "pinecone";

/// Default pause between readiness polls after creating an index.
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of readiness polls before giving up (two minutes).
pub const DEFAULT_READY_MAX_POLLS: u32 = 24;

#[derive(Clone)]
pub struct PineconeSettings {
    pub api_key: String,
    pub controller_url: String,
    /// Fixed data-plane URL; when unset it is taken from the index
    /// description.
    pub index_url: Option<String>,
    pub ready_poll_interval: Duration,
    pub ready_max_polls: u32,
}

impl PineconeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.pinecone_api_key.clone(),
            controller_url: config.pinecone_controller_url.clone(),
            index_url: config.pinecone_index_url.clone(),
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            ready_max_polls: DEFAULT_READY_MAX_POLLS,
        }
    }
}

pub struct PineconeStore {
    settings: PineconeSettings,
    client: reqwest::Client,
    project: Option<String>,
    /// Resolved data-plane URLs per index name.
    hosts: HashMap<String, String>,
}

impl PineconeStore {
    pub fn new(settings: PineconeSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(settings.api_key.trim()).map_err(|_| {
                Error::ConfigValidation("invalid Pinecone API key".into())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Connection {
                backend: BACKEND,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            settings,
            client,
            project: None,
            hosts: HashMap::new(),
        })
    }

    /// Project name reported by the controller, once initialized.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    fn controller(&self, path: &str) -> String {
        format!(
            "{}{path}",
            self.settings.controller_url.trim_end_matches('/')
        )
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.project.is_some() {
            Ok(())
        } else {
            Err(Error::Connection {
                backend: BACKEND,
                message: "client used before initialize".into(),
            })
        }
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.controller("/databases"))
            .send()
            .await
            .map_err(|e| backend_error("list indexes", e))?;
        let resp = check_status(resp, "list indexes").await?;
        resp.json()
            .await
            .map_err(|e| backend_error("parse index list", e))
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let resp = self
            .client
            .get(self.controller(&format!("/databases/{name}")))
            .send()
            .await
            .map_err(|e| backend_error("describe index", e))?;
        let resp = check_status(resp, "describe index").await?;
        resp.json()
            .await
            .map_err(|e| backend_error("parse index description", e))
    }

    async fn wait_until_ready(&self, name: &str) -> Result<()> {
        let creation_error = |message: String| Error::IndexCreation {
            index: name.to_string(),
            message,
        };

        for attempt in 1..=self.settings.ready_max_polls {
            let description = self
                .describe_index(name)
                .await
                .map_err(|e| creation_error(e.to_string()))?;
            if description.status.ready {
                tracing::info!(index = name, attempt, "index is ready");
                return Ok(());
            }
            tracing::debug!(
                index = name,
                attempt,
                state = description.status.state.as_deref().unwrap_or("unknown"),
                "index not ready yet"
            );
            tokio::time::sleep(self.settings.ready_poll_interval).await;
        }

        Err(creation_error(format!(
            "index not ready after {} polls",
            self.settings.ready_max_polls
        )))
    }

    /// Data-plane base URL for `index`.
    async fn index_url(&self, index: &str) -> Result<String> {
        if let Some(url) = &self.settings.index_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        if let Some(url) = self.hosts.get(index) {
            return Ok(url.clone());
        }
        let description = self.describe_index(index).await?;
        let host = description.status.host.ok_or_else(|| Error::Backend {
            backend: BACKEND,
            message: format!("index '{index}' has no host yet"),
        })?;
        Ok(format!("https://{host}"))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> Backend {
        Backend::Pinecone
    }

    async fn initialize(&mut self) -> Result<()> {
        let connection_error = |message: String| Error::Connection {
            backend: BACKEND,
            message,
        };

        let resp = self
            .client
            .get(self.controller("/actions/whoami"))
            .send()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
            {
                format!("invalid credentials ({status})")
            } else {
                format!("controller returned {status}: {body}")
            };
            return Err(connection_error(message));
        }

        let whoami: WhoAmI = resp
            .json()
            .await
            .map_err(|e| connection_error(format!("bad whoami response: {e}")))?;
        tracing::debug!(project = %whoami.project_name, "connected to pinecone");
        self.project = Some(whoami.project_name);
        Ok(())
    }

    async fn ensure_index(
        &mut self,
        name: &str,
        dimension: usize,
    ) -> Result<IndexStatus> {
        self.ensure_initialized()?;
        tracing::info!(index = name, "creating index");

        let creation_error = |message: String| Error::IndexCreation {
            index: name.to_string(),
            message,
        };

        let existing = self
            .list_indexes()
            .await
            .map_err(|e| creation_error(e.to_string()))?;
        tracing::info!(?existing, "existing indexes");
        if existing.iter().any(|index| index == name) {
            tracing::info!(index = name, "index already exists");
            return Ok(IndexStatus::AlreadyExists);
        }

        let request = CreateIndexRequest {
            name,
            dimension,
            metric: "cosine",
        };
        let resp = self
            .client
            .post(self.controller("/databases"))
            .json(&request)
            .send()
            .await
            .map_err(|e| creation_error(e.to_string()))?;
        check_status(resp, "create index")
            .await
            .map_err(|e| creation_error(e.to_string()))?;
        tracing::info!(index = name, dimension, "created index");

        self.wait_until_ready(name).await?;
        Ok(IndexStatus::Created)
    }

    async fn write_batch(
        &mut self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<()> {
        self.ensure_initialized()?;
        if records.is_empty() {
            return Ok(());
        }

        let url = self.index_url(index).await?;
        self.hosts.insert(index.to_string(), url.clone());

        let request = UpsertRequest {
            vectors: records
                .iter()
                .map(|record| WireVector {
                    id: &record.id,
                    values: &record.values,
                    metadata: &record.metadata,
                })
                .collect(),
        };
        let resp = self
            .client
            .post(format!("{url}/vectors/upsert"))
            .json(&request)
            .send()
            .await
            .map_err(|e| backend_error("upsert", e))?;
        let resp = check_status(resp, "upsert").await?;
        let parsed: UpsertResponse = resp
            .json()
            .await
            .map_err(|e| backend_error("parse upsert response", e))?;
        if let Some(count) = parsed.upserted_count
            && count != records.len()
        {
            tracing::warn!(
                index,
                sent = records.len(),
                upserted = count,
                "upsert count mismatch"
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let query_error = |e: Error| Error::QueryService {
            index: index.to_string(),
            message: e.to_string(),
        };
        self.ensure_initialized().map_err(query_error)?;

        let url = self.index_url(index).await.map_err(query_error)?;
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
        };
        let resp = self
            .client
            .post(format!("{url}/query"))
            .json(&request)
            .send()
            .await
            .map_err(|e| query_error(backend_error("query", e)))?;
        let resp = check_status(resp, "query").await.map_err(query_error)?;
        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| query_error(backend_error("parse query response", e)))?;

        let mut matches = Vec::with_capacity(parsed.matches.len());
        for hit in parsed.matches {
            let Some(metadata) = hit.metadata else {
                tracing::warn!(index, id = %hit.id, "match without metadata");
                continue;
            };
            match serde_json::from_value::<RecordMetadata>(metadata) {
                Ok(metadata) => matches.push(QueryMatch {
                    id: hit.id,
                    score: hit.score,
                    metadata,
                }),
                Err(e) => {
                    tracing::warn!(index, id = %hit.id, error = %e, "unreadable match metadata")
                }
            }
        }
        Ok(super::top_k(matches, top_k))
    }
}

fn backend_error(operation: &str, e: reqwest::Error) -> Error {
    Error::Backend {
        backend: BACKEND,
        message: format!("{operation}: {e}"),
    }
}

async fn check_status(
    resp: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(Error::Backend {
        backend: BACKEND,
        message: format!("{operation} returned {status}: {body}"),
    })
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    project_name: String,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    status: IndexState,
}

#[derive(Debug, Deserialize)]
struct IndexState {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector<'a>>,
}

#[derive(Serialize)]
struct WireVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a RecordMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}
