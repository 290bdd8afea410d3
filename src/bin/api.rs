use chart_chat_pipeline::{api::start_server, ChatPipeline, PipelineConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_env();

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; chat requests will fail until it is configured");
    }
    if config.portfolio_api_url.is_none() {
        warn!("PORTFOLIO_API_URL not set; portfolio context disabled");
    }
    if config.search_api_url.is_none() {
        warn!("SEARCH_API_URL not set; live search context disabled");
    }

    info!("Chart Chat Pipeline - API Server");
    info!("Port: {}", config.port);
    info!("Default model: {}", config.default_model);

    let pipeline = Arc::new(ChatPipeline::from_config(&config)?);

    info!("Pipeline initialized, starting API server...");

    start_server(pipeline, config.request_timeout, config.port).await?;

    Ok(())
}
