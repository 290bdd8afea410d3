//! Error types for the chart chat pipeline

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Maximum characters of an upstream body kept in error messages
const MAX_UPSTREAM_MESSAGE_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Input Errors
    // =============================

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =============================
    // Upstream Errors
    // =============================

    #[error("{service} rejected the configured credentials")]
    Unauthorized { service: &'static str },

    #[error("{service} rate limit exceeded, please retry later")]
    RateLimited { service: &'static str },

    #[error("{service} returned {status}: {message}")]
    Upstream {
        service: &'static str,
        status: u16,
        message: String,
    },

    // =============================
    // Local Errors
    // =============================

    #[error("Chart validation error on '{field}': {sample}")]
    ChartValidation { field: String, sample: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Classify a non-2xx upstream response.
    pub fn from_status(service: &'static str, status: u16, body: &str) -> Self {
        match status {
            401 => PipelineError::Unauthorized { service },
            429 => PipelineError::RateLimited { service },
            _ => PipelineError::Upstream {
                service,
                status,
                message: truncate_chars(body.trim(), MAX_UPSTREAM_MESSAGE_CHARS),
            },
        }
    }

    /// HTTP status this error is surfaced with.
    pub fn http_status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            PipelineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Upstream { status, .. } if (400..600).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            PipelineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Unauthorized { .. } => "unauthorized",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::Upstream { .. } => "upstream_error",
            PipelineError::ChartValidation { .. } => "chart_validation",
            PipelineError::Config(_) => "configuration_error",
            PipelineError::DeadlineExceeded(_) => "deadline_exceeded",
            PipelineError::SerializationError(_) => "serialization_error",
            PipelineError::HttpError(_) => "network_error",
            PipelineError::IoError(_) => "io_error",
        }
    }
}

/// Errors that may carry an upstream HTTP status code.
///
/// The retry executor uses this to tell terminal client errors apart from
/// transient failures.
pub trait HasStatusCode {
    fn status_code(&self) -> Option<u16>;
}

impl HasStatusCode for PipelineError {
    fn status_code(&self) -> Option<u16> {
        match self {
            PipelineError::InvalidRequest(_) => Some(400),
            PipelineError::Unauthorized { .. } => Some(401),
            PipelineError::RateLimited { .. } => Some(429),
            PipelineError::Upstream { status, .. } => Some(*status),
            PipelineError::HttpError(e) => e.status_code(),
            _ => None,
        }
    }
}

impl HasStatusCode for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    code: &'static str,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let (error, details) = match &self {
            PipelineError::RateLimited { .. } => (
                "Rate limit exceeded. Please retry later.".to_string(),
                Some(self.to_string()),
            ),
            PipelineError::Unauthorized { .. } => {
                ("Authentication failed".to_string(), Some(self.to_string()))
            }
            PipelineError::InvalidRequest(msg) => (msg.clone(), None),
            _ => ("Failed to process chat request".to_string(), Some(self.to_string())),
        };

        let body = ErrorBody {
            error,
            details,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
