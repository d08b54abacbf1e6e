//! Anthropic provider adapter
//!
//! Messages API wire format: the system prompt is hoisted out of the
//! message list into a dedicated field, tool results are re-encoded as
//! `tool_result` content blocks inside a user message (there is no tool
//! role), and proposed calls arrive as typed `tool_use` content blocks.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ChatOptions, ChatResponse, Provider, ProviderError, TokenUsage};
use crate::conversation::{Message, Role, ToolCall};
use crate::registry::ToolDefinition;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const PROVIDER: &str = "anthropic";

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ---------- wire types ----------

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: HashMap<String, serde_json::Value>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    model: String,
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    r#type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ---------- translation ----------

/// Hoist system messages into the dedicated field and re-encode the rest
/// as content-block messages. Consecutive tool results collapse into one
/// user message with multiple `tool_result` blocks, preserving order.
fn encode_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.text().to_string()),
            Role::User => wire.push(WireMessage {
                role: "user",
                content: vec![ContentBlock::Text {
                    text: message.text().to_string(),
                }],
            }),
            Role::Assistant => {
                let mut content = Vec::new();
                if let Some(text) = &message.content {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text: text.clone() });
                    }
                }
                for call in &message.tool_calls {
                    content.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                wire.push(WireMessage {
                    role: "assistant",
                    content,
                });
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.text().to_string(),
                };
                // Merge into the preceding tool-result user message if the
                // provider returned several calls at once
                match wire.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => wire.push(WireMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

fn encode_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| {
            let mut input_schema = tool.input_schema.clone();
            if !tool.required.is_empty() {
                if let Some(object) = input_schema.as_object_mut() {
                    object.insert("required".to_string(), serde_json::json!(tool.required));
                }
            }
            WireTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema,
            }
        })
        .collect()
}

fn parse_response(response: MessageResponse) -> Result<ChatResponse, ProviderError> {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block.r#type.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    text_parts.push(text);
                }
            }
            "tool_use" => {
                let name = block.name.ok_or_else(|| ProviderError::MalformedResponse {
                    provider: PROVIDER,
                    reason: "tool_use block without name".to_string(),
                })?;
                tool_calls.push(ToolCall {
                    // Synthesize an id if the vendor omitted one
                    id: block
                        .id
                        .unwrap_or_else(|| format!("toolu-{}", uuid::Uuid::new_v4())),
                    name,
                    arguments: block.input.unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text_parts.join("\n"),
        tool_calls,
        usage: TokenUsage {
            input: response.usage.input_tokens,
            output: response.usage.output_tokens,
        },
        model: response.model,
    })
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_key(&self) -> Result<(), ProviderError> {
        if !self.api_key.starts_with("sk-ant-") {
            return Err(ProviderError::InvalidKey {
                provider: PROVIDER,
                reason: "expected prefix sk-ant-".to_string(),
            });
        }
        if self.api_key.len() < 20 {
            return Err(ProviderError::InvalidKey {
                provider: PROVIDER,
                reason: "key too short".to_string(),
            });
        }
        Ok(())
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.validate_key()?;

        let (system, wire_messages) = encode_messages(messages);
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system,
            messages: wire_messages,
            tools: encode_tools(tools),
        };

        debug!(
            "Calling Anthropic API: model={}, messages={}, tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message,
            });
        }

        let body: MessageResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        let parsed = parse_response(body)?;
        info!(
            "Anthropic response: model={}, in={}, out={}, tool_calls={}",
            parsed.model,
            parsed.usage.input,
            parsed.usage.output,
            parsed.tool_calls.len()
        );

        Ok(parsed)
    }
}
