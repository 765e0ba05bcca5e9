use budget_link::{api::start_server, config::AppConfig, plaid, store::InMemoryDocumentStore, Pipeline};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Budget Link - API Server");
    info!("Port: {}", config.port);
    info!("Institutions: {}", config.pipeline.institution_ids.join(", "));

    // Create components
    let store = Arc::new(InMemoryDocumentStore::new());
    let financial_api = plaid::from_config(&config)?;
    let pipeline = Arc::new(Pipeline::new(store, financial_api, config.pipeline.clone()));

    info!("Pipeline initialized, starting API server");

    start_server(pipeline, config.port).await?;

    Ok(())
}
