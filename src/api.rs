//! REST API server for the chat pipeline
//!
//! Exposes the pipeline via HTTP endpoints for the chat frontend

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};

use crate::error::PipelineError;
use crate::models::ChatRequest;
use crate::pipeline::ChatPipeline;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ChatPipeline>,
    pub request_timeout: Duration,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("chat", %request_id);

    async move {
        let body = match body {
            Ok(Json(body)) => body,
            Err(rejection) => {
                warn!(error = %rejection, "Rejected unreadable request body");
                return PipelineError::InvalidRequest(format!(
                    "Malformed request: {}",
                    rejection.body_text()
                ))
                .into_response();
            }
        };

        let request = match ChatRequest::from_json(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Invalid chat request");
                return e.into_response();
            }
        };

        match run_with_deadline(&state, request).await {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(e) => {
                warn!(error = %e, code = e.code(), "Chat request failed");
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_with_deadline(state: &ApiState, request: ChatRequest) -> crate::Result<Value> {
    let response = tokio::time::timeout(state.request_timeout, state.pipeline.run(request))
        .await
        .map_err(|_| PipelineError::DeadlineExceeded(state.request_timeout))??;

    Ok(response.into_json())
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<ChatPipeline>, request_timeout: Duration) -> Router {
    let state = ApiState {
        pipeline,
        request_timeout,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<ChatPipeline>,
    request_timeout: Duration,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline, request_timeout);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
