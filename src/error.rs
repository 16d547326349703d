use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("connection to {backend} failed: {message}")]
    Connection {
        backend: &'static str,
        message: String,
    },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("failed to create index '{index}': {message}")]
    IndexCreation { index: String, message: String },

    #[error("upsert into '{index}' failed for records {start}..{end}: {source}")]
    Upsert {
        index: String,
        start: usize,
        end: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("indexing '{source_path}' failed: {source}")]
    Document {
        source_path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("query against '{index}' failed: {message}")]
    QueryService { index: String, message: String },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("unsupported DB_TYPE: {0}")]
    UnsupportedBackend(String),

    #[error(
        "vector has {actual} dimensions but index '{index}' expects {expected}"
    )]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("{backend} request failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
