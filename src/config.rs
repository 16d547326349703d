//! Process configuration.
//!
//! [`Config`] holds the credentials and backend choice read from the
//! environment; it is built once in `main` and handed to every component by
//! reference. [`Settings`] holds the pipeline tunables, which default to the
//! values below and can be overridden from the command line.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DOCUMENTS_DIR: &str = "./documents";
pub const DEFAULT_PATTERN: &str = "**/*.md";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_DIMENSION: usize = 1536;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.9;

const REQUIRED_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "PINECONE_API_KEY",
    "PINECONE_ENVIRONMENT",
    "PINECONE_INDEX",
    "DB_TYPE",
];

/// Which vector store implementation serves this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Hosted Pinecone index; lifecycle managed by the service.
    Pinecone,
    /// Process-local index rebuilt from the documents on every run.
    Memory,
    /// Process-local index persisted to a redb file in the data directory.
    Persistent,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Pinecone => "pinecone",
            Backend::Memory => "memory",
            Backend::Persistent => "persistent",
        }
    }

    /// Whether indexes must be provisioned with `ensure_index` before writes.
    ///
    /// The in-memory store has no create step: records define the index.
    pub fn provisions_indexes(self) -> bool {
        !matches!(self, Backend::Memory)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(Backend::Pinecone),
            "memory" | "faiss" => Ok(Backend::Memory),
            "persistent" | "redb" | "chroma" => Ok(Backend::Persistent),
            _ => Err(Error::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Credentials, endpoints and backend selection, validated at startup.
#[derive(Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub pinecone_api_key: String,
    pub pinecone_environment: String,
    pub pinecone_index: String,
    pub pinecone_controller_url: String,
    pub pinecone_index_url: Option<String>,
    pub backend: Backend,
}

impl Config {
    /// Read and validate configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read and validate configuration from an arbitrary key lookup.
    ///
    /// Every missing or blank required variable is reported at once.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use docqa::config::{Backend, Config};
    ///
    /// let env: HashMap<&str, &str> = HashMap::from([
    ///     ("OPENAI_API_KEY", "sk-test"),
    ///     ("PINECONE_API_KEY", "pc-test"),
    ///     ("PINECONE_ENVIRONMENT", "us-west1-gcp"),
    ///     ("PINECONE_INDEX", "docs"),
    ///     ("DB_TYPE", "memory"),
    /// ]);
    /// let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
    /// assert_eq!(config.backend, Backend::Memory);
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "missing required environment variable(s): {}",
                missing.join(", ")
            )));
        }

        let required = |key: &str| get(key).unwrap_or_default();
        let backend: Backend = required("DB_TYPE").parse()?;
        let pinecone_environment = required("PINECONE_ENVIRONMENT");

        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        let pinecone_controller_url = get("PINECONE_CONTROLLER_URL")
            .unwrap_or_else(|| {
                format!("https://controller.{pinecone_environment}.pinecone.io")
            });
        let pinecone_index_url = get("PINECONE_INDEX_URL");

        for (key, url) in [
            ("OPENAI_BASE_URL", Some(&openai_base_url)),
            ("PINECONE_CONTROLLER_URL", Some(&pinecone_controller_url)),
            ("PINECONE_INDEX_URL", pinecone_index_url.as_ref()),
        ] {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(Error::ConfigValidation(format!(
                    "{key} must be an http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY"),
            openai_base_url,
            pinecone_api_key: required("PINECONE_API_KEY"),
            pinecone_environment,
            pinecone_index: required("PINECONE_INDEX"),
            pinecone_controller_url,
            pinecone_index_url,
            backend,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("openai_base_url", &self.openai_base_url)
            .field("pinecone_environment", &self.pinecone_environment)
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_controller_url", &self.pinecone_controller_url)
            .field("pinecone_index_url", &self.pinecone_index_url)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub documents_dir: PathBuf,
    pub patterns: Vec<String>,
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    pub top_k: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub chat_model: String,
    pub temperature: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from(DEFAULT_DOCUMENTS_DIR),
            patterns: vec![DEFAULT_PATTERN.to_string()],
            chunking: ChunkingConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                overlap: DEFAULT_CHUNK_OVERLAP,
            },
            batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Settings {
    /// Reject tunables that would stall or break the pipeline.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("chunk size", self.chunking.chunk_size),
            ("batch size", self.batch_size),
            ("top-k", self.top_k),
            ("dimension", self.dimension),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::ConfigValidation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::ConfigValidation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.patterns.is_empty() {
            return Err(Error::ConfigValidation(
                "at least one file pattern is required".into(),
            ));
        }
        Ok(())
    }
}
