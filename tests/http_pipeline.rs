use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json,
    Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use docqa::{
    Error,
    Settings,
    answer::{Answer, Answerer},
    embedding::{Embedder, OpenAiEmbedder},
    indexing::index_documents,
    llm::{LanguageModel, OpenAiChat},
    loader::{self, Document},
    vector_store::{
        IndexStatus,
        PineconeSettings,
        PineconeStore,
        RedbStore,
        VectorStore,
    },
};
use serde::Deserialize;
use serde_json::{Value, json};

const DIM: usize = 16;

#[derive(Default)]
struct FakeIndex {
    dimension: usize,
    describe_calls: u32,
    vectors: BTreeMap<String, (Vec<f32>, Value)>,
}

#[derive(Default)]
struct FakeState {
    reject_auth: bool,
    fail_embeddings: bool,
    /// Describe calls that report "Initializing" before the index is ready.
    polls_until_ready: u32,
    create_calls: usize,
    indexes: HashMap<String, FakeIndex>,
    upsert_sizes: Vec<usize>,
    embedding_inputs: Vec<Vec<String>>,
    chat_prompts: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut values = vec![0.0f32; DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(5381u64, |h, b| h.wrapping_mul(33) ^ u64::from(b));
        values[hash as usize % DIM] += 1.0;
    }
    values
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[derive(Deserialize)]
struct EmbeddingRequest {
    input: Vec<String>,
}

async fn embeddings(
    State(state): State<Shared>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    if state.fail_embeddings {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    state.embedding_inputs.push(request.input.clone());
    // Reversed on purpose: clients must order by `index`.
    let data: Vec<Value> = request
        .input
        .iter()
        .enumerate()
        .rev()
        .map(|(index, text)| json!({ "embedding": bag_of_words(text), "index": index }))
        .collect();
    Ok(Json(json!({ "data": data })))
}

async fn chat(State(state): State<Shared>, Json(request): Json<Value>) -> Json<Value> {
    let prompt = request["messages"][0]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().chat_prompts.push(prompt);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": " A small test document. " } }]
    }))
}

async fn whoami(State(state): State<Shared>) -> Result<Json<Value>, StatusCode> {
    if state.lock().unwrap().reject_auth {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({ "project_name": "test-project", "user_label": "default" })))
}

async fn list_indexes(State(state): State<Shared>) -> Json<Vec<String>> {
    let mut names: Vec<String> = state.lock().unwrap().indexes.keys().cloned().collect();
    names.sort();
    Json(names)
}

#[derive(Deserialize)]
struct CreateIndex {
    name: String,
    dimension: usize,
    metric: String,
}

async fn create_index(
    State(state): State<Shared>,
    Json(request): Json<CreateIndex>,
) -> StatusCode {
    assert_eq!(request.metric, "cosine");
    let mut state = state.lock().unwrap();
    state.create_calls += 1;
    if state.indexes.contains_key(&request.name) {
        return StatusCode::CONFLICT;
    }
    state.indexes.insert(request.name, FakeIndex {
        dimension: request.dimension,
        ..FakeIndex::default()
    });
    StatusCode::CREATED
}

async fn describe_index(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    let polls_until_ready = state.polls_until_ready;
    let index = state.indexes.get_mut(&name).ok_or(StatusCode::NOT_FOUND)?;
    index.describe_calls += 1;
    let ready = index.describe_calls > polls_until_ready;
    Ok(Json(json!({
        "database": { "name": name, "dimension": index.dimension, "metric": "cosine" },
        "status": {
            "ready": ready,
            "state": if ready { "Ready" } else { "Initializing" },
            "host": format!("{name}-test.svc.pinecone.io"),
        }
    })))
}

#[derive(Deserialize)]
struct Upsert {
    vectors: Vec<UpsertVector>,
}

#[derive(Deserialize)]
struct UpsertVector {
    id: String,
    values: Vec<f32>,
    metadata: Value,
}

/// The fake serves a single data-plane index named "docs".
async fn upsert(
    State(state): State<Shared>,
    Json(request): Json<Upsert>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    let count = request.vectors.len();
    state.upsert_sizes.push(count);
    let index = state.indexes.get_mut("docs").ok_or(StatusCode::NOT_FOUND)?;
    for vector in request.vectors {
        if vector.values.len() != index.dimension {
            return Err(StatusCode::BAD_REQUEST);
        }
        index.vectors.insert(vector.id, (vector.values, vector.metadata));
    }
    Ok(Json(json!({ "upsertedCount": count })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Query {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

async fn query(
    State(state): State<Shared>,
    Json(request): Json<Query>,
) -> Result<Json<Value>, StatusCode> {
    assert!(request.include_metadata);
    let state = state.lock().unwrap();
    let index = state.indexes.get("docs").ok_or(StatusCode::NOT_FOUND)?;
    let mut scored: Vec<(f32, &String, &Value)> = index
        .vectors
        .iter()
        .map(|(id, (values, metadata))| (cosine(&request.vector, values), id, metadata))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then_with(|| a.1.cmp(b.1)));
    let matches: Vec<Value> = scored
        .into_iter()
        .take(request.top_k)
        .map(|(score, id, metadata)| json!({ "id": id, "score": score, "metadata": metadata }))
        .collect();
    Ok(Json(json!({ "matches": matches, "namespace": "" })))
}

struct FakeServer {
    base: String,
    state: Shared,
}

impl FakeServer {
    async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/v1/embeddings", post(embeddings))
            .route("/v1/chat/completions", post(chat))
            .route("/actions/whoami", get(whoami))
            .route("/databases", get(list_indexes).post(create_index))
            .route("/databases/{name}", get(describe_index))
            .route("/vectors/upsert", post(upsert))
            .route("/query", post(query))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    fn openai_base(&self) -> String {
        format!("{}/v1", self.base)
    }

    fn embedder(&self) -> OpenAiEmbedder {
        OpenAiEmbedder::new("sk-test", &self.openai_base(), "text-embedding-ada-002", DIM)
            .unwrap()
    }

    fn chat(&self) -> OpenAiChat {
        OpenAiChat::new("sk-test", &self.openai_base(), "gpt-3.5-turbo", 0.9).unwrap()
    }

    fn pinecone(&self) -> PineconeStore {
        PineconeStore::new(PineconeSettings {
            api_key: "pc-test".into(),
            controller_url: self.base.clone(),
            index_url: Some(self.base.clone()),
            ready_poll_interval: Duration::from_millis(5),
            ready_max_polls: 5,
        })
        .unwrap()
    }
}

fn settings(batch_size: usize) -> Settings {
    Settings {
        batch_size,
        dimension: DIM,
        ..Settings::default()
    }
}

#[tokio::test]
async fn embeddings_come_back_in_input_order() {
    let server = FakeServer::start().await;
    let embedder = server.embedder();
    let texts = vec!["alpha".to_string(), "beta gamma".to_string()];

    let vectors = embedder.embed_batch(&texts).await.unwrap();
    assert_eq!(vectors, vec![bag_of_words("alpha"), bag_of_words("beta gamma")]);
}

#[tokio::test]
async fn embedding_failures_are_service_errors() {
    let server = FakeServer::start().await;
    server.state.lock().unwrap().fail_embeddings = true;

    let err = server.embedder().embed_one("hello").await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingService(msg) if msg.contains("503")));
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let server = FakeServer::start().await;
    let embedder =
        OpenAiEmbedder::new("sk-test", &server.openai_base(), "m", DIM + 1).unwrap();

    let err = embedder.embed_one("hello").await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingService(_)));
}

#[tokio::test]
async fn chat_answer_is_trimmed() {
    let server = FakeServer::start().await;
    let answer = server
        .chat()
        .answer_from_context("Hello world.", "What is this?")
        .await
        .unwrap();
    assert_eq!(answer, "A small test document.");

    let prompts = server.state.lock().unwrap().chat_prompts.clone();
    assert!(prompts[0].contains("Hello world."));
    assert!(prompts[0].contains("Question: What is this?"));
}

#[tokio::test]
async fn rejected_credentials_fail_initialize() {
    let server = FakeServer::start().await;
    server.state.lock().unwrap().reject_auth = true;

    let mut store = server.pinecone();
    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Connection { backend: "pinecone", .. }));
}

#[tokio::test]
async fn unreachable_controller_fails_initialize() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut store = PineconeStore::new(PineconeSettings {
        api_key: "pc-test".into(),
        controller_url: format!("http://{addr}"),
        index_url: None,
        ready_poll_interval: Duration::from_millis(1),
        ready_max_polls: 1,
    })
    .unwrap();
    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
}

#[tokio::test]
async fn ensure_index_creates_once_and_waits_until_ready() {
    let server = FakeServer::start().await;
    server.state.lock().unwrap().polls_until_ready = 2;

    let mut store = server.pinecone();
    store.initialize().await.unwrap();
    assert_eq!(store.project(), Some("test-project"));

    assert_eq!(store.ensure_index("docs", DIM).await.unwrap(), IndexStatus::Created);
    assert_eq!(
        store.ensure_index("docs", DIM).await.unwrap(),
        IndexStatus::AlreadyExists
    );

    let state = server.state.lock().unwrap();
    assert_eq!(state.create_calls, 1);
    assert_eq!(state.indexes["docs"].describe_calls, 3);
}

#[tokio::test]
async fn readiness_poll_exhaustion_is_a_creation_error() {
    let server = FakeServer::start().await;
    server.state.lock().unwrap().polls_until_ready = 100;

    let mut store = server.pinecone();
    store.initialize().await.unwrap();
    let err = store.ensure_index("docs", DIM).await.unwrap_err();
    assert!(matches!(err, Error::IndexCreation { index, .. } if index == "docs"));
}

#[tokio::test]
async fn pinecone_index_and_answer() {
    let server = FakeServer::start().await;
    let embedder = server.embedder();
    let mut store = server.pinecone();
    store.initialize().await.unwrap();

    let docs: Vec<Document> = (0..5)
        .map(|i| {
            let body = format!("Section {i}.\n\n") + &"filler words here ".repeat(80);
            Document::new(format!("notes/{i}.md"), body)
        })
        .chain([Document::new("a.md", "Hello world. This is a test.")])
        .collect();

    let report = index_documents(&mut store, &embedder, "docs", &docs, &settings(2))
        .await
        .unwrap();
    assert_eq!(report.index_status, Some(IndexStatus::Created));
    assert_eq!(report.documents, 6);

    {
        let state = server.state.lock().unwrap();
        assert_eq!(state.upsert_sizes.iter().sum::<usize>(), report.records);
        assert!(state.upsert_sizes.iter().all(|&n| n <= 2));
        assert_eq!(state.upsert_sizes.len(), report.batches);
        // One embedding call per non-empty document.
        assert_eq!(state.embedding_inputs.len(), 6);

        let (_, metadata) = &state.indexes["docs"].vectors["a.md-0"];
        assert_eq!(metadata["sourcePath"], "a.md");
        assert_eq!(metadata["chunkOrdinal"], 0);
        assert_eq!(metadata["pageContent"], "Hello world. This is a test.");
        assert!(metadata["loc"].as_str().unwrap().contains("\"lines\""));
    }

    // Same documents again: every id is overwritten, none added.
    let stored_before = server.state.lock().unwrap().indexes["docs"].vectors.len();
    let again = index_documents(&mut store, &embedder, "docs", &docs, &settings(2))
        .await
        .unwrap();
    assert_eq!(again.index_status, Some(IndexStatus::AlreadyExists));
    assert_eq!(server.state.lock().unwrap().indexes["docs"].vectors.len(), stored_before);

    let llm = server.chat();
    let answerer = Answerer {
        embedder: &embedder,
        store: &store,
        llm: &llm,
        index: "docs",
        top_k: 3,
    };
    let answer = answerer.answer("Hello world test").await.unwrap();
    match answer {
        Answer::Synthesized { text, matches } => {
            assert_eq!(text, "A small test document.");
            assert_eq!(matches.len(), 3);
            assert_eq!(matches[0].id, "a.md-0");
            assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
        }
        Answer::NoMatches => panic!("expected an answer"),
    }
}

#[tokio::test]
async fn empty_remote_index_skips_chat() {
    let server = FakeServer::start().await;
    let embedder = server.embedder();
    let mut store = server.pinecone();
    store.initialize().await.unwrap();
    store.ensure_index("docs", DIM).await.unwrap();

    let llm = server.chat();
    let answerer = Answerer {
        embedder: &embedder,
        store: &store,
        llm: &llm,
        index: "docs",
        top_k: 10,
    };
    assert_eq!(answerer.answer("anything?").await.unwrap(), Answer::NoMatches);
    assert!(server.state.lock().unwrap().chat_prompts.is_empty());
}

#[tokio::test]
async fn persistent_store_survives_reopen() {
    let server = FakeServer::start().await;
    let embedder = server.embedder();
    let tmp = tempfile::tempdir().unwrap();
    let docs_dir = tmp.path().join("documents");
    std::fs::create_dir_all(&docs_dir).unwrap();
    std::fs::write(docs_dir.join("a.md"), "Hello world. This is a test.").unwrap();
    std::fs::write(docs_dir.join("skip.txt"), "not markdown").unwrap();
    let db_path = tmp.path().join("data").join("vectors.redb");

    let docs = loader::load_documents(&docs_dir, &["**/*.md".to_string()]).unwrap();
    assert_eq!(docs.len(), 1);

    {
        let mut store = RedbStore::new(db_path.clone());
        store.initialize().await.unwrap();
        let report = index_documents(&mut store, &embedder, "docs", &docs, &settings(100))
            .await
            .unwrap();
        assert_eq!(report.records, 1);
    }

    let mut store = RedbStore::new(db_path.clone());
    store.initialize().await.unwrap();
    assert_eq!(store.ids("docs").unwrap(), vec!["a.md-0".to_string()]);

    let llm = server.chat();
    let answerer = Answerer {
        embedder: &embedder,
        store: &store,
        llm: &llm,
        index: "docs",
        top_k: 10,
    };
    let answer = answerer.answer("What is this?").await.unwrap();
    assert!(!answer.text().is_empty());
    let prompts = server.state.lock().unwrap().chat_prompts.clone();
    assert!(prompts[0].contains("Hello world. This is a test."));
}
