use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config::{
        DEFAULT_BATCH_SIZE,
        DEFAULT_CHAT_MODEL,
        DEFAULT_DIMENSION,
        DEFAULT_DOCUMENTS_DIR,
        DEFAULT_EMBEDDING_MODEL,
        DEFAULT_PATTERN,
        DEFAULT_TEMPERATURE,
        DEFAULT_TOP_K,
        Settings,
    },
};

#[derive(Debug, Parser)]
#[command(
    name = "docqa",
    about = "Index a folder of documents and ask questions about it"
)]
pub struct Cli {
    /// Override the XDG data directory (persistent backend)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding model name
    #[arg(long, global = true, default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Embedding vector dimension
    #[arg(long, global = true, default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,

    /// Chat model used to synthesize answers
    #[arg(long, global = true, default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Sampling temperature for the chat model
    #[arg(long, global = true, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and store every document in the documents directory
    #[command(alias = "create")]
    Index(IndexArgs),
    /// Answer a question from the indexed documents
    Query(QueryArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

/// Where documents come from and how they are cut up.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Directory to read documents from
    #[arg(long, default_value = DEFAULT_DOCUMENTS_DIR)]
    pub documents: PathBuf,

    /// Glob of files to load, relative to the documents directory
    /// (repeatable)
    #[arg(long = "glob", default_value = DEFAULT_PATTERN)]
    pub patterns: Vec<String>,

    /// Target chunk size in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Records per vector store write
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question to answer
    pub question: String,

    /// Number of chunks to retrieve as context
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Output the answer and its sources as JSON
    #[arg(long)]
    pub json: bool,

    /// Used by the memory backend, which indexes before answering
    #[command(flatten)]
    pub source: SourceArgs,
}

impl Cli {
    /// Pipeline settings for this invocation.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            chat_model: self.chat_model.clone(),
            temperature: self.temperature,
            ..Settings::default()
        };
        match &self.command {
            Command::Index(args) => args.source.apply(&mut settings),
            Command::Query(args) => {
                args.source.apply(&mut settings);
                settings.top_k = args.top_k;
            }
            Command::Completions(_) => {}
        }
        settings
    }
}

impl SourceArgs {
    fn apply(&self, settings: &mut Settings) {
        settings.documents_dir = self.documents.clone();
        settings.patterns = self.patterns.clone();
        settings.chunking = ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        };
        settings.batch_size = self.batch_size;
    }
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docqa",
            &mut std::io::stdout(),
        );
    }
}
