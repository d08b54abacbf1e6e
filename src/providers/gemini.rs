//! Gemini provider adapter
//!
//! generateContent wire format: the system prompt moves to
//! `systemInstruction`, the assistant role is named `model`, proposed calls
//! are inline `functionCall` parts without ids (the adapter synthesizes
//! them), and tool results are `functionResponse` parts correlated by
//! function name rather than call id.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ChatOptions, ChatResponse, Provider, ProviderError, TokenUsage};
use crate::conversation::{Message, Role, ToolCall};
use crate::registry::ToolDefinition;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const PROVIDER: &str = "gemini";

/// Gemini generateContent client
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
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
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTools>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

// ---------- translation ----------

/// Map each call id back to its function name by scanning earlier
/// assistant messages. Gemini correlates results by name, the abstract
/// model by id; the lookup keeps the translation lossless.
fn call_names_by_id(messages: &[Message]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        for call in &message.tool_calls {
            names.insert(call.id.clone(), call.name.clone());
        }
    }
    names
}

fn encode_messages(messages: &[Message]) -> (Option<SystemInstruction>, Vec<Content>) {
    let names = call_names_by_id(messages);
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(Part::Text {
                text: message.text().to_string(),
            }),
            Role::User => contents.push(Content {
                role: "user",
                parts: vec![Part::Text {
                    text: message.text().to_string(),
                }],
            }),
            Role::Assistant => {
                let mut parts = Vec::new();
                if let Some(text) = &message.content {
                    if !text.is_empty() {
                        parts.push(Part::Text { text: text.clone() });
                    }
                }
                for call in &message.tool_calls {
                    parts.push(Part::FunctionCall {
                        function_call: FunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    });
                }
                contents.push(Content {
                    role: "model",
                    parts,
                });
            }
            Role::Tool => {
                let name = message
                    .tool_call_id
                    .as_ref()
                    .and_then(|id| names.get(id))
                    .cloned()
                    .unwrap_or_default();
                contents.push(Content {
                    role: "user",
                    parts: vec![Part::FunctionResponse {
                        function_response: FunctionResponse {
                            name,
                            response: serde_json::json!({
                                "content": message.text(),
                            }),
                        },
                    }],
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(SystemInstruction {
            parts: system_parts,
        })
    };
    (system, contents)
}

fn encode_tools(tools: &[ToolDefinition]) -> Vec<WireTools> {
    if tools.is_empty() {
        return Vec::new();
    }

    let declarations = tools
        .iter()
        .map(|tool| {
            let mut parameters = tool.input_schema.clone();
            if !tool.required.is_empty() {
                if let Some(object) = parameters.as_object_mut() {
                    object.insert("required".to_string(), serde_json::json!(tool.required));
                }
            }
            FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters,
            }
        })
        .collect();

    vec![WireTools {
        function_declarations: declarations,
    }]
}

fn parse_response(response: GenerateResponse, model: &str) -> Result<ChatResponse, ProviderError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER,
            reason: "no candidates in response".to_string(),
        })?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(content) = candidate.content {
        for part in content.parts {
            if let Some(text) = part.text {
                text_parts.push(text);
            }
            if let Some(call) = part.function_call {
                // Gemini supplies no call id; synthesize one so result
                // correlation still works downstream
                tool_calls.push(ToolCall {
                    id: format!("call-{}", uuid::Uuid::new_v4()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }
    }

    Ok(ChatResponse {
        content: text_parts.join("\n"),
        tool_calls,
        usage: TokenUsage {
            input: response.usage_metadata.prompt_token_count,
            output: response.usage_metadata.candidates_token_count,
        },
        model: model.to_string(),
    })
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_key(&self) -> Result<(), ProviderError> {
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

        let (system_instruction, contents) = encode_messages(messages);
        let request = GenerateRequest {
            system_instruction,
            contents,
            tools: encode_tools(tools),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        debug!(
            "Calling Gemini API: model={}, contents={}",
            self.model,
            request.contents.len()
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        let parsed = parse_response(body, &self.model)?;
        info!(
            "Gemini response: model={}, in={}, out={}, tool_calls={}",
            parsed.model,
            parsed.usage.input,
            parsed.usage.output,
            parsed.tool_calls.len()
        );

        Ok(parsed)
    }
}
