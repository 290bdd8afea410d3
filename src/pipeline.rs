//! Chat pipeline - implements the per-request flow
//!
//! INPUT → ATTACH → FUSE → GENERATE → NORMALIZE → RESPOND
//!
//! Stateless: every request is handled on its own and nothing outlives it.

use crate::audit;
use crate::chart::{self, chart_tool, CHART_TOOL_NAME, SYSTEM_DIRECTIVE};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fusion::ContextFusionEngine;
use crate::gemini::{GeminiClient, GenerativeModel};
use crate::models::{
    ChatRequest, ChatResponse, ContentPart, ConversationTurn, FileData, MessageContent,
};
use crate::portfolio::HttpPortfolioClient;
use crate::search::HttpSearchClient;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Main pipeline that coordinates fusion, generation and normalization
pub struct ChatPipeline {
    fusion: ContextFusionEngine,
    model: Arc<dyn GenerativeModel>,
}

impl ChatPipeline {
    pub fn new(fusion: ContextFusionEngine, model: Arc<dyn GenerativeModel>) -> Self {
        Self { fusion, model }
    }

    /// Wire the HTTP-backed collaborators from configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let portfolio = Arc::new(HttpPortfolioClient::from_config(config)?);
        let search = Arc::new(HttpSearchClient::from_config(config)?);
        let model = Arc::new(GeminiClient::from_config(config)?);

        Ok(Self::new(ContextFusionEngine::new(portfolio, search), model))
    }

    /// Run one chat request end to end.
    ///
    /// Fails only on input errors or when the model call itself fails;
    /// supplementary data and chart problems degrade the answer instead.
    pub async fn run(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start_time = Instant::now();
        let flags = request.fusion_flags();
        let ChatRequest {
            messages,
            model,
            icf_mapping,
            file_data,
            ..
        } = request;

        if messages.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "At least one message is required".to_string(),
            ));
        }

        info!(
            model = %model,
            turns = messages.len(),
            live_data = flags.include_live_data,
            "Pipeline: starting request"
        );

        // === ATTACH (binary) ===
        let mut conversation = messages;
        let text_attachment = match file_data {
            Some(file) if file.is_text => Some(decode_text_attachment(&file)?),
            Some(file) => {
                attach_binary(&mut conversation, &file)?;
                None
            }
            None => None,
        };

        // === FUSE ===
        let mut fused = self
            .fusion
            .augment(conversation, icf_mapping.as_ref(), &flags)
            .await;

        // === ATTACH (text) ===
        // Kept out of the search query, so appended after fusion.
        if let Some(attachment) = text_attachment {
            if let Some(last) = fused.last_mut() {
                append_text(&mut last.content, &attachment);
            }
        }

        debug!(
            fingerprint = %audit::fingerprint(&fused),
            "Fused conversation ready"
        );

        // === GENERATE ===
        let tool = chart_tool();
        let raw = self
            .model
            .invoke(&model, &fused, SYSTEM_DIRECTIVE, &tool)
            .await?;

        // === NORMALIZE ===
        let content = raw.text();
        let invocation = raw.tool_invocation(CHART_TOOL_NAME);
        let tool_use = invocation.map(|(_, input)| input.clone());

        let chart_data = invocation.and_then(|(name, input)| match chart::normalize(input) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(tool = name, error = %e, "Discarding malformed chart tool output");
                None
            }
        });

        info!(
            has_tool_use = tool_use.is_some(),
            has_chart = chart_data.is_some(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline: request complete"
        );

        Ok(ChatResponse {
            content,
            has_tool_use: tool_use.is_some(),
            tool_use,
            chart_data,
        })
    }
}

fn decode_attachment(file: &FileData) -> Result<Vec<u8>> {
    STANDARD.decode(file.base64.trim()).map_err(|e| {
        PipelineError::InvalidRequest(format!("fileData is not valid base64: {}", e))
    })
}

fn decode_text_attachment(file: &FileData) -> Result<String> {
    let bytes = decode_attachment(file)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        PipelineError::InvalidRequest("fileData marked as text is not valid UTF-8".to_string())
    })?;

    Ok(format!(
        "Attached file ({}):\n```\n{}\n```",
        file.media_type,
        text.trim_end()
    ))
}

/// Add a binary part to the last turn, converting plain text to parts.
fn attach_binary(conversation: &mut [ConversationTurn], file: &FileData) -> Result<()> {
    decode_attachment(file)?;

    let Some(last) = conversation.last_mut() else {
        return Ok(());
    };

    let binary = ContentPart::Binary {
        media_type: file.media_type.clone(),
        data: file.base64.trim().to_string(),
    };

    match &mut last.content {
        MessageContent::Parts(parts) => parts.push(binary),
        MessageContent::Text(text) => {
            let mut parts = Vec::with_capacity(2);
            if !text.trim().is_empty() {
                parts.push(ContentPart::Text {
                    text: std::mem::take(text),
                });
            }
            parts.push(binary);
            last.content = MessageContent::Parts(parts);
        }
    }

    Ok(())
}

/// Append `extra` to the content's text, creating a text part if needed.
fn append_text(content: &mut MessageContent, extra: &str) {
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(extra);
        }
        MessageContent::Parts(parts) => {
            let existing = parts.iter_mut().find_map(|part| match part {
                ContentPart::Text { text } => Some(text),
                ContentPart::Binary { .. } => None,
            });

            match existing {
                Some(text) => {
                    text.push_str("\n\n");
                    text.push_str(extra);
                }
                None => parts.insert(
                    0,
                    ContentPart::Text {
                        text: extra.to_string(),
                    },
                ),
            }
        }
    }
}
