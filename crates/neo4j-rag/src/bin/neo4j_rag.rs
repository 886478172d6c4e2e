//! neo4j-rag command line
//!
//! Run with: cargo run -p neo4j-rag -- query "Who created the Dothraki vocabulary?"

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neo4j_rag::config::DEFAULT_QUESTION;
use neo4j_rag::providers::{embedder_from_config, llm_from_config};
use neo4j_rag::{loader, IndexingPipeline, Neo4jDocumentStore, RagConfig, RagPipeline};

#[derive(Parser)]
#[command(name = "neo4j-rag")]
#[command(version)]
#[command(about = "Question answering over documents stored in Neo4j", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "NEO4J_RAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed documents
    Query {
        /// The question to ask
        question: Option<String>,

        /// Number of documents to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load .txt/.md files into the document store
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Drop and recreate the vector index first
        #[arg(long)]
        recreate_index: bool,
    },

    /// Print the pipeline components and connections
    Describe,
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

async fn query(config: RagConfig, question: Option<String>, top_k: Option<usize>, json: bool) -> anyhow::Result<()> {
    let question = question.unwrap_or_else(|| DEFAULT_QUESTION.to_string());
    let top_k = top_k.unwrap_or(config.retriever.top_k);

    let progress = spinner(format!("Answering with {}...", config.llm.model));
    let rag = RagPipeline::build(&config).await.context("Failed to build the RAG pipeline")?;
    let answer = rag.ask(&question, top_k).await;
    progress.finish_and_clear();
    let answer = answer?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{} {}", style("Query:").bold(), answer.query);
    println!("{} {}", style("Answer:").bold().green(), answer.data.trim());
    println!("{}", style("== Sources:").bold());
    for document in &answer.documents {
        println!("-> {}", document.file_path().unwrap_or("<unknown>"));
    }
    Ok(())
}

async fn index(mut config: RagConfig, paths: Vec<PathBuf>, recreate_index: bool) -> anyhow::Result<()> {
    config.document_store.recreate_index |= recreate_index;
    config.embedder.progress_bar = true;

    let documents = loader::load_documents(&paths).await?;
    if documents.is_empty() {
        println!("{}", style("No .txt or .md files found").yellow());
        return Ok(());
    }

    let indexing = IndexingPipeline::build(&config)
        .await
        .context("Failed to build the indexing pipeline")?;
    let files = documents.len();
    let written = indexing.run(documents).await?;

    println!(
        "{} Indexed {} chunks from {} files into '{}'",
        style("✓").green(),
        written,
        files,
        config.document_store.index
    );
    Ok(())
}

fn describe(config: &RagConfig) -> anyhow::Result<()> {
    let store = Arc::new(Neo4jDocumentStore::new(&config.document_store)?);
    let rag = RagPipeline::from_parts(
        config,
        embedder_from_config(&config.embedder)?,
        store,
        llm_from_config(&config.llm)?,
    )?;

    println!("{}", style("Query pipeline").bold());
    println!("{}", rag.describe());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neo4j_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = RagConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    tracing::debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Query { question, top_k, json } => query(config, question, top_k, json).await,
        Commands::Index { paths, recreate_index } => index(config, paths, recreate_index).await,
        Commands::Describe => describe(&config),
    }
}
