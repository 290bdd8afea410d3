//! Gemini API client for chart-aware generation
//!
//! Sends the fused conversation, the system directive and the chart tool
//! declaration to Gemini and maps the reply into [`RawModelResponse`].
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::chart::ToolDefinition;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{ContentBlock, ContentPart, ConversationTurn, MessageContent, RawModelResponse, Role};
use crate::retry::{self, RetryPolicy};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

pub const GEMINI_SERVICE: &str = "gemini";

/// A generative model that can answer with text and tool invocations
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        conversation: &[ConversationTurn],
        system_directive: &str,
        tool: &ToolDefinition,
    ) -> Result<RawModelResponse>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    policy: RetryPolicy,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            config.http_timeout,
            config.retry_policy.clone(),
        )
    }

    async fn generate_once(&self, url: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                PipelineError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Gemini API error response: {}", error_text);
            return Err(PipelineError::from_status(
                GEMINI_SERVICE,
                status.as_u16(),
                &error_text,
            ));
        }

        Ok(response.json::<GeminiResponse>().await?)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn invoke(
        &self,
        model: &str,
        conversation: &[ConversationTurn],
        system_directive: &str,
        tool: &ToolDefinition,
    ) -> Result<RawModelResponse> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/{}:generateContent", self.base_url, model);
        let request = build_request(conversation, system_directive, tool);

        info!(model, turns = conversation.len(), "Calling Gemini API");

        let response = retry::execute(|| self.generate_once(&url, &request), &self.policy).await?;
        let raw = into_raw_response(response)?;

        info!(blocks = raw.blocks.len(), "Gemini response received");
        Ok(raw)
    }
}

fn build_request(
    conversation: &[ConversationTurn],
    system_directive: &str,
    tool: &ToolDefinition,
) -> GeminiRequest {
    let contents = conversation
        .iter()
        .map(|turn| Content {
            role: Some(
                match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
            ),
            parts: match &turn.content {
                MessageContent::Text(text) => vec![RequestPart::text(text)],
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => RequestPart::text(text),
                        ContentPart::Binary { media_type, data } => RequestPart {
                            text: None,
                            inline_data: Some(InlineData {
                                mime_type: media_type.clone(),
                                data: data.clone(),
                            }),
                        },
                    })
                    .collect(),
            },
        })
        .collect();

    GeminiRequest {
        contents,
        system_instruction: Content {
            role: None,
            parts: vec![RequestPart::text(system_directive)],
        },
        tools: vec![ToolDeclarations {
            function_declarations: vec![FunctionDeclaration {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                parameters_json_schema: tool.parameters.clone(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 4096,
        },
    }
}

fn into_raw_response(response: GeminiResponse) -> Result<RawModelResponse> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        PipelineError::Upstream {
            service: GEMINI_SERVICE,
            status: 502,
            message: "No candidates in Gemini response".to_string(),
        }
    })?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason != "STOP" {
            info!(finish_reason = reason, "Gemini finished early");
        }
    }

    let blocks = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|part| !part.thought)
        .filter_map(|part| match (part.function_call, part.text) {
            (Some(call), _) => Some(ContentBlock::ToolInvocation {
                name: call.name,
                input: call.args,
            }),
            (None, Some(text)) => Some(ContentBlock::Text(text)),
            (None, None) => None,
        })
        .collect();

    Ok(RawModelResponse { blocks })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl RequestPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

/// `parametersJsonSchema` takes full JSON Schema, unlike the OpenAPI-subset
/// `parameters` field, which rejects open-ended objects.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters_json_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}
