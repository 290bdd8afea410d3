//! Chart Chat Pipeline
//!
//! Request augmentation and response normalization for a charting chat
//! assistant:
//! - Enriches the latest user turn with portfolio holdings and live search
//! - Invokes a generative model with a single chart-drawing tool
//! - Repairs and validates the tool output into a renderable chart payload
//! - Retries transient upstream failures with capped exponential backoff
//!
//! REQUEST FLOW:
//! INPUT → ATTACH → FUSE → GENERATE → NORMALIZE → RESPOND

pub mod api;
pub mod audit;
pub mod chart;
pub mod config;
pub mod error;
pub mod fusion;
pub mod gemini;
pub mod models;
pub mod pipeline;
pub mod portfolio;
pub mod retry;
pub mod search;

pub use error::{PipelineError, Result};

// Re-export common types
pub use config::PipelineConfig;
pub use models::*;
pub use pipeline::ChatPipeline;
