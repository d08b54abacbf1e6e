//! Conversation model
//!
//! In-memory, append-only message history owned by a single agent instance.
//! Unlike the learning store (persistent facts), the conversation lives and
//! dies with the process and is cleared explicitly by the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque correlation id; synthesized when the vendor supplies none
    pub id: String,
    /// Tool name as listed in the registry
    pub name: String,
    /// Argument mapping
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Get a string argument
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.arguments.get(key).and_then(|v| v.as_u64())
    }
}

/// A single message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content; None for assistant messages that only carry tool calls
    pub content: Option<String>,
    /// Tool calls carried by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-result messages: the id of the call being answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message carrying proposed tool calls
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool-result message correlated to a call id
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Ordered, append-only message history
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation seeded with a system prompt
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Append a message; order is causal and never rewritten
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last assistant text, if the conversation ends with one
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.content.as_deref())
    }

    /// Drop all history except the leading system prompt, if any
    pub fn clear(&mut self) {
        let system = self
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .cloned();
        self.messages.clear();
        if let Some(system) = system {
            self.messages.push(system);
        }
    }
}

/// Bracketed environment grounding prefixed to a user message.
///
/// Keeps open-file / board / port facts visible to the model without
/// restructuring the persisted message content.
pub fn annotate_with_context(
    input: &str,
    sketch: Option<&str>,
    board: Option<&str>,
    port: Option<&str>,
) -> String {
    let mut tags = Vec::new();
    if let Some(sketch) = sketch {
        tags.push(format!("sketch: {}", sketch));
    }
    if let Some(board) = board {
        tags.push(format!("board: {}", board));
    }
    if let Some(port) = port {
        tags.push(format!("port: {}", port));
    }

    if tags.is_empty() {
        input.to_string()
    } else {
        format!("[{}] {}", tags.join(" | "), input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_order() {
        let mut conv = Conversation::new();
        conv.push(Message::user("first"));
        conv.push(Message::assistant("second"));
        conv.push(Message::user("third"));

        assert_eq!(conv.len(), 3);
        assert_eq!(conv.messages()[0].text(), "first");
        assert_eq!(conv.messages()[2].text(), "third");
    }

    #[test]
    fn test_clear_keeps_system_prompt() {
        let mut conv = Conversation::with_system_prompt("You are an assistant");
        conv.push(Message::user("hello"));
        conv.push(Message::assistant("hi"));

        conv.clear();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
    }

    #[test]
    fn test_tool_result_correlation() {
        let msg = Message::tool_result("call_42", "done");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_42"));
    }

    #[test]
    fn test_context_annotation() {
        let annotated =
            annotate_with_context("why won't it compile?", Some("blink.ino"), Some("uno"), None);
        assert_eq!(
            annotated,
            "[sketch: blink.ino | board: uno] why won't it compile?"
        );

        let plain = annotate_with_context("hello", None, None, None);
        assert_eq!(plain, "hello");
    }

    #[test]
    fn test_last_assistant_text() {
        let mut conv = Conversation::new();
        assert!(conv.last_assistant_text().is_none());

        conv.push(Message::user("q"));
        conv.push(Message::assistant("a1"));
        conv.push(Message::tool_result("id", "out"));
        assert_eq!(conv.last_assistant_text(), Some("a1"));
    }
}
