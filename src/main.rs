use std::process::ExitCode;

use clap::Parser;
use docqa::{
    Config,
    Result,
    Settings,
    answer::{Answer, Answerer},
    cli::{Cli, Command, QueryArgs},
    config::Backend,
    embedding::OpenAiEmbedder,
    indexing::{self, IndexReport},
    llm::OpenAiChat,
    loader,
    vector_store::{self, VectorStore},
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCQA_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return ExitCode::SUCCESS;
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match &cli.command {
                Command::Query(args) => {
                    tracing::error!(question = %args.question, "query failed: {e}")
                }
                _ => tracing::error!("indexing failed: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::from_env()?;
    let settings = cli.settings();
    settings.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let embedder = OpenAiEmbedder::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &settings.embedding_model,
        settings.dimension,
    )?;
    let mut store = vector_store::open(&config, cli.data_dir.as_deref())?;
    store.initialize().await?;

    match &cli.command {
        Command::Index(_) => {
            let report =
                build_index(&mut *store, &embedder, &config, &settings).await?;
            println!(
                "Indexed {} documents into '{}': {} chunks, {} records in {} writes",
                report.documents,
                config.pinecone_index,
                report.chunks,
                report.records,
                report.batches
            );
        }
        Command::Query(args) => {
            // Nothing outlives the process in the memory backend.
            if config.backend == Backend::Memory {
                build_index(&mut *store, &embedder, &config, &settings)
                    .await?;
            }
            cmd_query(&*store, &embedder, &config, &settings, args)
                .await?;
        }
        Command::Completions(_) => {}
    }
    Ok(())
}

async fn build_index(
    store: &mut dyn VectorStore,
    embedder: &OpenAiEmbedder,
    config: &Config,
    settings: &Settings,
) -> Result<IndexReport> {
    let documents =
        loader::load_documents(&settings.documents_dir, &settings.patterns)?;
    if documents.is_empty() {
        tracing::warn!(
            dir = %settings.documents_dir.display(),
            "no documents matched"
        );
    }
    indexing::index_documents(
        store,
        embedder,
        &config.pinecone_index,
        &documents,
        settings,
    )
    .await
}

async fn cmd_query(
    store: &dyn VectorStore,
    embedder: &OpenAiEmbedder,
    config: &Config,
    settings: &Settings,
    args: &QueryArgs,
) -> Result<()> {
    let llm = OpenAiChat::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &settings.chat_model,
        settings.temperature,
    )?;
    let answerer = Answerer {
        embedder,
        store,
        llm: &llm,
        index: &config.pinecone_index,
        top_k: settings.top_k,
    };
    let answer = answerer.answer(&args.question).await?;

    if args.json {
        print_json(&args.question, &answer);
    } else {
        print_human(&answer);
    }
    Ok(())
}

fn print_json(question: &str, answer: &Answer) {
    let sources: Vec<_> = answer
        .matches()
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "score": m.score,
                "source": m.metadata.source_path,
            })
        })
        .collect();
    let text = match answer {
        Answer::NoMatches => None,
        Answer::Synthesized { text, .. } => Some(text.as_str()),
    };
    let output = serde_json::json!({
        "question": question,
        "answer": text,
        "sources": sources,
    });
    println!("{output}");
}

fn print_human(answer: &Answer) {
    println!("{}", answer.text().trim());
    let matches = answer.matches();
    if matches.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (rank, m) in matches.iter().enumerate() {
        println!("  {}. {} (score: {:.3})", rank + 1, m.id, m.score);
    }
}
