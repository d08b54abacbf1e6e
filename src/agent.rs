//! Agent orchestration loop
//!
//! Drives the model/tool conversation: send the history, execute whatever
//! tool calls come back in order, append the results, and go again until
//! the model answers in plain text or the iteration cap trips. Mode
//! decides which tools the model can see; provider failures fall through
//! to the next configured adapter with the conversation intact.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::EditorState;
use crate::conversation::{annotate_with_context, Conversation, Message};
use crate::executor::{ToolExecutor, ToolResult};
use crate::memory::{LearningStats, LearningStore};
use crate::providers::{ChatOptions, ChatResponse, ProviderRegistry, TokenUsage};
use crate::registry::{ToolDefinition, ToolSet};

const SYSTEM_PROMPT: &str = "You are an Arduino development assistant embedded in a \
sketch workbench. You can read and edit the open sketch, compile and upload it, \
talk to the board over serial, and consult a memory of previously seen errors \
and their fixes. Prefer looking up an error in memory before reasoning about it \
from scratch, and record fixes that worked so they can be reused.";

/// Conversation mode, controlling tool visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Plain Q&A, no tools, single round-trip
    Ask,
    /// Analysis tools only - nothing that touches hardware or the sketch
    Debug,
    /// Full tool catalog
    Agent,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Ask => "ask",
            ChatMode::Debug => "debug",
            ChatMode::Agent => "agent",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        Some(match name {
            "ask" => ChatMode::Ask,
            "debug" => ChatMode::Debug,
            "agent" => ChatMode::Agent,
            _ => return None,
        })
    }
}

/// How a query run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The model produced a final text answer
    Completed,
    /// The iteration cap tripped while tools were still being requested
    IterationLimit,
    /// Every configured provider failed
    ProviderFailed,
}

/// Outcome of one query, always returned as data
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub status: QueryStatus,
    /// Final assistant text, or a diagnostic when no answer was produced
    pub response: String,
    pub iterations: u32,
    pub tool_results: Vec<ToolResult>,
    pub usage: TokenUsage,
    /// Provider that produced the final response, if any
    pub provider: Option<&'static str>,
}

/// The orchestration core
pub struct Agent {
    conversation: Conversation,
    providers: ProviderRegistry,
    executor: Arc<ToolExecutor>,
    editor: Arc<dyn EditorState>,
    store: Arc<Mutex<LearningStore>>,
    mode: ChatMode,
    options: ChatOptions,
    max_iterations: u32,
}

impl Agent {
    pub fn new(
        providers: ProviderRegistry,
        executor: Arc<ToolExecutor>,
        editor: Arc<dyn EditorState>,
        store: Arc<Mutex<LearningStore>>,
        options: ChatOptions,
        max_iterations: u32,
    ) -> Self {
        Self {
            conversation: Conversation::with_system_prompt(SYSTEM_PROMPT),
            providers,
            executor,
            editor,
            store,
            mode: ChatMode::Agent,
            options,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ChatMode) {
        debug!("Mode set to {}", mode.as_str());
        self.mode = mode;
    }

    /// Move a provider to the front of the fallback order
    pub fn prefer_provider(&mut self, name: &str) {
        self.providers.prefer(name);
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.names()
    }

    /// Drop the history, keeping the system prompt
    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn memory_stats(&self) -> Result<LearningStats> {
        self.store.lock().stats()
    }

    /// Run one user query through the iterative tool loop.
    ///
    /// Tool calls execute sequentially in the order the model proposed
    /// them; each result is appended before the next provider round-trip.
    pub async fn process_query(&mut self, input: &str) -> QueryOutcome {
        let snapshot = self.editor.snapshot();
        let sketch = self
            .editor
            .current_path()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
        let annotated = annotate_with_context(
            input,
            sketch.as_deref(),
            snapshot.selected_board.as_deref(),
            snapshot.selected_port.as_deref(),
        );
        self.conversation.push(Message::user(annotated));

        let tools = self.tools_for_mode();
        let mut tool_results = Vec::new();
        let mut usage = TokenUsage::default();
        let mut provider_name = None;

        for iteration in 1..=self.max_iterations {
            let response = match self.chat_with_fallback(&tools).await {
                Ok((name, response)) => {
                    provider_name = Some(name);
                    response
                }
                Err(reason) => {
                    warn!("All providers failed: {}", reason);
                    return QueryOutcome {
                        status: QueryStatus::ProviderFailed,
                        response: format!("No provider could answer: {}", reason),
                        iterations: iteration - 1,
                        tool_results,
                        usage,
                        provider: None,
                    };
                }
            };

            usage.input += response.usage.input;
            usage.output += response.usage.output;

            if response.tool_calls.is_empty() {
                // An empty assistant turn would be rejected on the next
                // request by providers that forbid empty content
                if !response.content.is_empty() {
                    self.conversation
                        .push(Message::assistant(response.content.clone()));
                }
                info!(
                    "Query completed in {} iteration(s), {} tool call(s), {} in / {} out tokens",
                    iteration,
                    tool_results.len(),
                    usage.input,
                    usage.output
                );
                return QueryOutcome {
                    status: QueryStatus::Completed,
                    response: response.content,
                    iterations: iteration,
                    tool_results,
                    usage,
                    provider: provider_name,
                };
            }

            let content = if response.content.is_empty() {
                None
            } else {
                Some(response.content.clone())
            };
            self.conversation.push(Message::assistant_tool_calls(
                content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let result = self.executor.execute(call).await;
                self.conversation
                    .push(Message::tool_result(&call.id, result.to_message_content()));
                tool_results.push(result);
            }
        }

        warn!(
            "Iteration limit ({}) reached before a final answer",
            self.max_iterations
        );
        let response = self
            .conversation
            .last_assistant_text()
            .unwrap_or("Stopped after reaching the tool-iteration limit without a final answer.")
            .to_string();

        QueryOutcome {
            status: QueryStatus::IterationLimit,
            response,
            iterations: self.max_iterations,
            tool_results,
            usage,
            provider: provider_name,
        }
    }

    /// Analyze an error, memory first.
    ///
    /// An exact signature match with known fixes answers straight from
    /// the learning store with no provider round-trip. Otherwise the
    /// model is consulted, with any fuzzy near-misses inlined as hints.
    pub async fn analyze_error(&mut self, error: &str) -> QueryOutcome {
        let remembered = {
            let store = self.store.lock();
            if let Err(e) = store.record_error(error, None, None) {
                warn!("Failed to record error for analysis: {:#}", e);
            }
            store.search_similar(error, 3).ok()
        };

        if let Some(answer) = remembered
            .as_ref()
            .and_then(|o| o.exact.as_ref())
            .and_then(answer_from_memory)
        {
            info!("Error analysis answered from memory, no provider call");
            self.conversation
                .push(Message::user(format!("Analyze this error:\n{}", error)));
            self.conversation.push(Message::assistant(answer.clone()));
            return QueryOutcome {
                status: QueryStatus::Completed,
                response: answer,
                iterations: 0,
                tool_results: Vec::new(),
                usage: TokenUsage::default(),
                provider: None,
            };
        }

        let mut prompt = format!("Analyze this error and suggest a fix:\n{}", error);
        if let Some(outcome) = remembered {
            if !outcome.fuzzy.is_empty() {
                prompt.push_str("\n\nSimilar errors seen before:");
                for fuzzy in &outcome.fuzzy {
                    prompt.push_str(&format!("\n- {}", fuzzy.signature.raw_pattern));
                }
            }
        }
        self.process_query(&prompt).await
    }

    /// Analyze captured serial monitor output, memory first.
    ///
    /// Output that matches a remembered error signature with fixes is
    /// answered from the store; anything else goes to the model.
    pub async fn analyze_serial_output(&mut self, output: &str) -> QueryOutcome {
        let remembered = {
            let store = self.store.lock();
            store.search_similar(output, 3).ok()
        };

        if let Some(answer) = remembered
            .as_ref()
            .and_then(|o| o.exact.as_ref())
            .and_then(answer_from_memory)
        {
            info!("Serial analysis answered from memory, no provider call");
            self.conversation
                .push(Message::user(format!("Analyze this serial output:\n{}", output)));
            self.conversation.push(Message::assistant(answer.clone()));
            return QueryOutcome {
                status: QueryStatus::Completed,
                response: answer,
                iterations: 0,
                tool_results: Vec::new(),
                usage: TokenUsage::default(),
                provider: None,
            };
        }

        let prompt = format!(
            "Analyze this serial monitor output and explain what the board is doing. \
             Flag anything that looks like a crash, reset loop, or misbehavior:\n{}",
            output
        );
        self.process_query(&prompt).await
    }

    fn tools_for_mode(&self) -> Vec<ToolDefinition> {
        match self.mode {
            ChatMode::Ask => Vec::new(),
            ChatMode::Debug => self.executor.registry().subset(ToolSet::Analysis),
            ChatMode::Agent => self.executor.registry().subset(ToolSet::Full),
        }
    }

    /// One chat round-trip, trying each provider in fallback order.
    ///
    /// A provider failure costs nothing but the failed request; the
    /// conversation is untouched, so the next adapter sees the same
    /// history.
    async fn chat_with_fallback(
        &self,
        tools: &[ToolDefinition],
    ) -> std::result::Result<(&'static str, ChatResponse), String> {
        let mut last_error = String::from("no providers configured");

        for provider in self.providers.ordered() {
            match provider
                .chat(self.conversation.messages(), tools, &self.options)
                .await
            {
                Ok(response) => return Ok((provider.name(), response)),
                Err(e) => {
                    warn!("Provider {} failed, trying next: {}", provider.name(), e);
                    last_error = e.to_string();
                }
            }
        }

        Err(last_error)
    }
}

/// Render a memory answer from an exact match, or None when the match
/// carries nothing usable
fn answer_from_memory(exact: &crate::memory::SignatureMatch) -> Option<String> {
    if exact.fixes.is_empty() {
        return None;
    }

    let mut answer = format!(
        "This error has been seen {} time(s) before.",
        exact.signature.occurrence_count
    );
    for ranked in &exact.fixes {
        answer.push_str(&format!(
            "\n- {} (worked {} time(s))",
            ranked.fix.description, ranked.success_count
        ));
        if let Some(code) = &ranked.fix.code {
            answer.push_str(&format!("\n  code: {}", code));
        }
    }
    Some(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CompileOutput, EditorSnapshot, NoTransport, SketchCompiler, UploadOutput,
    };
    use crate::conversation::{Role, ToolCall};
    use crate::providers::{Provider, ProviderError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    struct StubCompiler;

    #[async_trait]
    impl SketchCompiler for StubCompiler {
        async fn compile(&self, _path: &Path, _board: &str) -> Result<CompileOutput> {
            Ok(CompileOutput {
                success: true,
                output: "ok".to_string(),
                warnings: vec![],
            })
        }

        async fn upload(&self, _path: &Path, _board: &str, _port: &str) -> Result<UploadOutput> {
            Ok(UploadOutput {
                success: true,
                output: "ok".to_string(),
            })
        }
    }

    struct StubEditor;

    impl EditorState for StubEditor {
        fn get_code(&self) -> Result<String> {
            Ok("void setup() {}".to_string())
        }

        fn set_code(&self, _code: &str) -> Result<()> {
            Ok(())
        }

        fn current_path(&self) -> Option<PathBuf> {
            Some(PathBuf::from("/tmp/blink/blink.ino"))
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn snapshot(&self) -> EditorSnapshot {
            EditorSnapshot {
                selected_board: Some("arduino:avr:uno".to_string()),
                selected_port: Some("/dev/ttyACM0".to_string()),
            }
        }
    }

    /// Provider that replays a scripted sequence of responses
    struct ScriptedProvider {
        name: &'static str,
        script: Mutex<VecDeque<std::result::Result<ChatResponse, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(
            name: &'static str,
            script: Vec<std::result::Result<ChatResponse, ProviderError>>,
        ) -> Self {
            Self {
                name,
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn validate_key(&self) -> std::result::Result<(), ProviderError> {
            Ok(())
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &ChatOptions,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            self.script.lock().pop_front().unwrap_or_else(|| {
                Err(ProviderError::MalformedResponse {
                    provider: "scripted",
                    reason: "script exhausted".to_string(),
                })
            })
        }
    }

    fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls: vec![],
            usage: TokenUsage { input: 10, output: 5 },
            model: "stub".to_string(),
        }
    }

    fn tool_response(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: calls,
            usage: TokenUsage { input: 10, output: 5 },
            model: "stub".to_string(),
        }
    }

    fn agent_with(providers: ProviderRegistry) -> Agent {
        let store = Arc::new(Mutex::new(LearningStore::open_in_memory().unwrap()));
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(StubCompiler),
            Arc::new(NoTransport),
            Arc::new(StubEditor),
            store.clone(),
            16,
        ));
        Agent::new(
            providers,
            executor,
            Arc::new(StubEditor),
            store,
            ChatOptions::default(),
            5,
        )
    }

    #[tokio::test]
    async fn test_plain_answer_completes_in_one_iteration() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Ok(text_response("Blink uses pin 13."))],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("what pin does blink use?").await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.response, "Blink uses pin 13.");
        assert_eq!(outcome.provider, Some("stub"));
        assert!(outcome.tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_answer_leaves_no_assistant_turn() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Ok(text_response(""))],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("anything to add?").await;
        assert_eq!(outcome.status, QueryStatus::Completed);

        // A blank turn must not linger in history where a later request
        // would replay it
        assert!(agent
            .conversation()
            .messages()
            .iter()
            .all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_user_message_carries_workspace_context() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Ok(text_response("ok"))],
        )));
        let mut agent = agent_with(registry);

        agent.process_query("compile this").await;
        let user = agent
            .conversation()
            .messages()
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert!(user.text().contains("blink.ino"));
        assert!(user.text().contains("arduino:avr:uno"));
        assert!(user.text().ends_with("compile this"));
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![
                Ok(tool_response(vec![ToolCall::new("c1", "read_sketch")])),
                Ok(text_response("The sketch is empty setup.")),
            ],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("what does my sketch do?").await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_results.len(), 1);
        assert!(outcome.tool_results[0].success);

        // History holds assistant tool-calls then the correlated result
        let messages = agent.conversation().messages();
        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_iteration_limit_trips() {
        // Always asks for another tool; the cap must stop it
        let script: Vec<_> = (0..10)
            .map(|i| {
                Ok(tool_response(vec![ToolCall::new(
                    format!("c{i}"),
                    "memory_stats",
                )]))
            })
            .collect();
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("stub", script)));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("loop forever").await;
        assert_eq!(outcome.status, QueryStatus::IterationLimit);
        assert_eq!(outcome.iterations, 5);
        assert_eq!(outcome.tool_results.len(), 5);
    }

    #[tokio::test]
    async fn test_provider_fallback_preserves_conversation() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "flaky",
            vec![Err(ProviderError::Api {
                provider: "flaky",
                status: 500,
                message: "overloaded".to_string(),
            })],
        )));
        registry.register(Arc::new(ScriptedProvider::new(
            "steady",
            vec![Ok(text_response("answer from fallback"))],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("hello").await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.provider, Some("steady"));
        assert_eq!(outcome.response, "answer from fallback");
    }

    #[tokio::test]
    async fn test_all_providers_failed_is_data() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "flaky",
            vec![Err(ProviderError::Api {
                provider: "flaky",
                status: 429,
                message: "rate limited".to_string(),
            })],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.process_query("hello").await;
        assert_eq!(outcome.status, QueryStatus::ProviderFailed);
        assert!(outcome.response.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_ask_mode_sends_no_tools() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Ok(text_response("ok"))],
        )));
        let mut agent = agent_with(registry);
        agent.set_mode(ChatMode::Ask);

        assert!(agent.tools_for_mode().is_empty());
        let debug_tools = {
            agent.set_mode(ChatMode::Debug);
            agent.tools_for_mode()
        };
        assert!(debug_tools.iter().all(|d| {
            crate::registry::ToolName::from_str(&d.name)
                .map(|n| n.is_analysis())
                .unwrap_or(false)
        }));
    }

    #[tokio::test]
    async fn test_analyze_error_answers_from_memory_without_provider() {
        // An empty script makes any provider call fail loudly
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("stub", vec![])));
        let mut agent = agent_with(registry);

        {
            let store = agent.store.lock();
            let hash = store
                .record_error("avrdude: not in sync", Some("upload"), None)
                .unwrap();
            store
                .record_fix(&hash, "press reset before upload", None, None)
                .unwrap();
        }

        let outcome = agent.analyze_error("avrdude: not in sync").await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.provider, None);
        assert!(outcome.response.contains("press reset before upload"));

        // The memory answer still lands in the conversation
        let last = agent.conversation().last_assistant_text().unwrap();
        assert!(last.contains("press reset before upload"));
    }

    #[tokio::test]
    async fn test_analyze_error_falls_through_when_memory_is_empty() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Ok(text_response("check your wiring"))],
        )));
        let mut agent = agent_with(registry);

        let outcome = agent.analyze_error("a brand new error").await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.provider, Some("stub"));
        assert_eq!(outcome.response, "check your wiring");

        // The observation was still recorded for next time
        let stats = agent.memory_stats().unwrap();
        assert_eq!(stats.error_count, 1);
    }

    #[tokio::test]
    async fn test_analyze_serial_output_answers_from_memory() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("stub", vec![])));
        let mut agent = agent_with(registry);

        {
            let store = agent.store.lock();
            let hash = store
                .record_error("Brownout detector was triggered", Some("serial"), None)
                .unwrap();
            store
                .record_fix(&hash, "use a stronger power supply", None, None)
                .unwrap();
        }

        let outcome = agent
            .analyze_serial_output("Brownout detector was triggered")
            .await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.provider, None);
        assert!(outcome.response.contains("use a stronger power supply"));
    }
}
