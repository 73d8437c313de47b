use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pdfchat::agent::{Agent, AgentScope};
use pdfchat::config::AppConfig;
use pdfchat::ingest::Ingestor;
use pdfchat::ollama::OllamaClient;

#[derive(Parser, Debug)]
#[command(name = "pdfchat-ingest")]
#[command(about = "Index a PDF into the knowledge collection and optionally ask it something")]
struct Cli {
    #[arg(long)]
    pdf: PathBuf,
    /// Replace previously indexed shared documents instead of adding to them.
    #[arg(long, default_value_t = false)]
    recreate: bool,
    #[arg(long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if cli.recreate {
        config.knowledge.recreate_collection = true;
    }

    let document = cli
        .pdf
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| cli.pdf.display().to_string());

    let ingestor = Ingestor::from_config(&config);
    // Seeded points belong to the scope API callers get when they send no client id.
    let owner = AgentScope::Shared.owner();
    let knowledge = ingestor.ingest_path(&owner, &document, &cli.pdf).await?;
    println!(
        "Indexed {} chunk(s) from {} into {}",
        knowledge.chunk_count(),
        knowledge.document(),
        config.qdrant_collection
    );

    if let Some(question) = cli.ask {
        let agent = Agent::new(
            OllamaClient::new(config.ollama_base_url.clone()),
            config.models.answer_model.clone(),
            knowledge,
            config.agent.clone(),
            config.knowledge.search_limit,
        );
        println!("{}", agent.run(&question).await?);
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
