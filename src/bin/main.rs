//! One-shot CLI: reads a chat request JSON from a file (first argument) or
//! stdin and prints the response JSON to stdout.

use chart_chat_pipeline::{ChatPipeline, ChatRequest, PipelineConfig, PipelineError};
use serde_json::{json, Value};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(response) => {
            println!("{}", response);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Request failed");
            println!("{}", json!({ "error": e.to_string(), "code": e.code() }));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<Value, PipelineError> {
    let config = PipelineConfig::from_env();

    let raw = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(&path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let mut body: Value = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::InvalidRequest(format!("Malformed request: {}", e)))?;

    if let Value::Object(map) = &mut body {
        let has_model = map
            .get("model")
            .and_then(Value::as_str)
            .is_some_and(|m| !m.trim().is_empty());
        if !has_model {
            map.insert("model".to_string(), json!(config.default_model));
        }
    }

    let request = ChatRequest::from_json(body)?;
    let pipeline = ChatPipeline::from_config(&config)?;

    info!(model = %request.model, "Running one-shot chat request");

    let response = tokio::time::timeout(config.request_timeout, pipeline.run(request))
        .await
        .map_err(|_| PipelineError::DeadlineExceeded(config.request_timeout))??;

    Ok(response.into_json())
}
