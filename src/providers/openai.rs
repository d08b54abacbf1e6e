//! OpenAI provider adapter
//!
//! Chat Completions wire format: tool results are a dedicated `tool` role
//! correlated by `tool_call_id`, tool declarations are wrapped in
//! `{type: "function", function: {...}}`, and call arguments arrive as a
//! JSON-encoded string that must be parsed back into a mapping.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ChatOptions, ChatResponse, Provider, ProviderError, TokenUsage};
use crate::conversation::{Message, Role, ToolCall};
use crate::registry::ToolDefinition;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const PROVIDER: &str = "openai";

/// OpenAI Chat Completions client
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
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
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------- translation ----------

fn encode_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::System | Role::User => WireMessage {
                role: message.role.as_str(),
                content: Some(message.text().to_string()),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant => WireMessage {
                role: "assistant",
                content: message.content.clone(),
                tool_calls: if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| WireToolCall {
                                id: call.id.clone(),
                                r#type: "function".to_string(),
                                function: WireFunctionCall {
                                    name: call.name.clone(),
                                    arguments: serde_json::to_string(&call.arguments)
                                        .unwrap_or_else(|_| "{}".to_string()),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            Role::Tool => WireMessage {
                role: "tool",
                content: Some(message.text().to_string()),
                tool_calls: None,
                tool_call_id: message.tool_call_id.clone(),
            },
        })
        .collect()
}

/// Re-encode the abstract tool schema, carrying `required` explicitly
fn encode_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| {
            let mut parameters = tool.input_schema.clone();
            if !tool.required.is_empty() {
                if let Some(object) = parameters.as_object_mut() {
                    object.insert("required".to_string(), serde_json::json!(tool.required));
                }
            }
            WireTool {
                r#type: "function",
                function: WireFunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters,
                },
            }
        })
        .collect()
}

fn parse_response(response: ChatCompletionResponse) -> Result<ChatResponse, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER,
            reason: "no choices in response".to_string(),
        })?;

    let mut tool_calls = Vec::new();
    for call in choice.message.tool_calls {
        let arguments: HashMap<String, serde_json::Value> =
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ProviderError::MalformedResponse {
                    provider: PROVIDER,
                    reason: format!("tool call arguments are not a JSON object: {}", e),
                }
            })?;
        tool_calls.push(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        });
    }

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: TokenUsage {
            input: response.usage.prompt_tokens,
            output: response.usage.completion_tokens,
        },
        model: response.model,
    })
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_key(&self) -> Result<(), ProviderError> {
        if !self.api_key.starts_with("sk-") {
            return Err(ProviderError::InvalidKey {
                provider: PROVIDER,
                reason: "expected prefix sk-".to_string(),
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

        let request = ChatRequest {
            model: self.model.clone(),
            messages: encode_messages(messages),
            tools: encode_tools(tools),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        debug!(
            "Calling OpenAI API: model={}, messages={}, tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
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

        let body: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|source| ProviderError::Http {
                    provider: PROVIDER,
                    source,
                })?;

        let parsed = parse_response(body)?;
        info!(
            "OpenAI response: model={}, in={}, out={}, tool_calls={}",
            parsed.model,
            parsed.usage.input,
            parsed.usage.output,
            parsed.tool_calls.len()
        );

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;

    #[test]
    fn test_encode_tool_result_role() {
        let messages = vec![
            Message::user("compile this"),
            Message::assistant_tool_calls(
                None,
                vec![ToolCall::new("call_1", "compile_sketch")],
            ),
            Message::tool_result("call_1", "ok"),
        ];

        let wire = encode_messages(&messages);
        assert_eq!(wire[2].role, "tool");
        assert_eq!(wire[2].tool_call_id.as_deref(), Some("call_1"));

        let calls = wire[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "compile_sketch");
        assert_eq!(calls[0].r#type, "function");
    }

    #[test]
    fn test_encode_tools_preserves_required() {
        let registry = ToolRegistry::new();
        let definition = registry.get_by_name("write_sketch").unwrap().clone();

        let wire = encode_tools(&[definition]);
        let value = serde_json::to_value(&wire[0]).unwrap();

        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "write_sketch");
        assert_eq!(value["function"]["parameters"]["required"][0], "code");
    }

    #[test]
    fn test_parse_response_decodes_argument_string() {
        let body: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "serial_connect",
                            "arguments": "{\"port\": \"/dev/ttyACM0\", \"baud_rate\": 115200}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))
        .unwrap();

        let parsed = parse_response(body).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        let call = &parsed.tool_calls[0];
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.get_str("port"), Some("/dev/ttyACM0"));
        assert_eq!(call.get_u64("baud_rate"), Some(115200));
        assert_eq!(parsed.usage.input, 10);
    }

    #[test]
    fn test_parse_response_rejects_bad_arguments() {
        let body: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "serial_connect", "arguments": "not json"}
                    }]
                }
            }]
        }))
        .unwrap();

        assert!(parse_response(body).is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(OpenAiProvider::new("sk-0123456789abcdef0123")
            .validate_key()
            .is_ok());
        assert!(OpenAiProvider::new("bad-key").validate_key().is_err());
        assert!(OpenAiProvider::new("sk-short").validate_key().is_err());
    }
}
