use anyhow::Result;
use tracing_subscriber::EnvFilter;

use pdfchat::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    tracing::info!(
        "answer model {} / embedding model {} / collection {}",
        config.models.answer_model,
        config.models.embedding_model,
        config.qdrant_collection
    );

    run_server(config).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
