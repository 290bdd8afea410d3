//! Core data models for the chart chat pipeline

use crate::chart::NormalizedChartPayload;
use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::error;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One typed segment of a structured message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Binary {
        media_type: String,
        /// Base64-encoded bytes
        data: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Plain-text view: structured content is flattened by joining its text
    /// segments with newlines.
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Binary { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_binary(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::Binary { .. })))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: MessageContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

//
// ================= Context =================
//

/// Identifiers that locate a client's portfolio
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextIdentifiers {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub banker_id: Option<String>,
    #[serde(default)]
    pub firm_name: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
}

impl ContextIdentifiers {
    /// Client, banker and firm all present and non-blank.
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.banker_id, &self.firm_name]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortfolioType {
    #[default]
    MasterOriginal,
    MasterProposed,
}

impl PortfolioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioType::MasterOriginal => "MASTER_ORIGINAL",
            PortfolioType::MasterProposed => "MASTER_PROPOSED",
        }
    }
}

impl fmt::Display for PortfolioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub content: String,
    pub citations: Vec<Citation>,
}

/// Supplementary data fused into the last conversation turn
#[derive(Debug, Clone, PartialEq)]
pub enum SupplementarySource {
    Portfolio(Value),
    LiveSearch(SearchResult),
}

/// Caller switches for context fusion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionFlags {
    pub include_live_data: bool,
    pub portfolio_type: PortfolioType,
}

//
// ================= Model Output =================
//

/// One content block emitted by the generative model
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolInvocation { name: String, input: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawModelResponse {
    pub blocks: Vec<ContentBlock>,
}

impl RawModelResponse {
    /// Text blocks in order, joined by a blank line.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The tool invocation named `preferred`, else the first one present.
    pub fn tool_invocation(&self, preferred: &str) -> Option<(&str, &Value)> {
        let mut invocations = self.blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolInvocation { name, input } => Some((name.as_str(), input)),
            ContentBlock::Text(_) => None,
        });

        let first = invocations.next()?;
        if first.0 == preferred {
            return Some(first);
        }

        invocations
            .find(|(name, _)| *name == preferred)
            .or(Some(first))
    }
}

//
// ================= API I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub base64: String,
    pub media_type: String,
    #[serde(default)]
    pub is_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ConversationTurn>,
    pub model: String,
    #[serde(default)]
    pub include_live_data: bool,
    #[serde(default)]
    pub icf_mapping: Option<ContextIdentifiers>,
    #[serde(default)]
    pub file_data: Option<FileData>,
    #[serde(default)]
    pub portfolio_type: Option<PortfolioType>,
}

impl ChatRequest {
    /// Parse an inbound JSON body, reporting shape problems as input errors.
    pub fn from_json(body: Value) -> Result<Self> {
        match body.get("messages") {
            Some(Value::Array(_)) => {}
            _ => {
                return Err(PipelineError::InvalidRequest(
                    "Messages array is required".to_string(),
                ))
            }
        }

        match body.get("model").and_then(Value::as_str) {
            Some(model) if !model.trim().is_empty() => {}
            _ => {
                return Err(PipelineError::InvalidRequest(
                    "Model selection is required".to_string(),
                ))
            }
        }

        let request: ChatRequest = serde_json::from_value(body)
            .map_err(|e| PipelineError::InvalidRequest(format!("Malformed request: {}", e)))?;

        if request.messages.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "At least one message is required".to_string(),
            ));
        }

        Ok(request)
    }

    pub fn fusion_flags(&self) -> FusionFlags {
        FusionFlags {
            include_live_data: self.include_live_data,
            portfolio_type: self.portfolio_type.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    pub has_tool_use: bool,
    pub tool_use: Option<Value>,
    pub chart_data: Option<NormalizedChartPayload>,
}

impl ChatResponse {
    /// Serialize for the wire; on failure drop only the chart fields.
    pub fn into_json(self) -> Value {
        match serde_json::to_value(&self) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to serialize chat response, dropping chart fields");
                serde_json::json!({
                    "content": self.content,
                    "hasToolUse": false,
                    "toolUse": null,
                    "chartData": null,
                })
            }
        }
    }
}
