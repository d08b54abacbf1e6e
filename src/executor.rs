//! Tool execution engine
//!
//! Validates proposed tool calls against the registry, fills omitted
//! parameters from editor state, dispatches to collaborators, and reports
//! every outcome as data. Nothing here throws across the boundary: a
//! failed tool becomes a `ToolResult` with `success: false` and an
//! actionable message, so the model can read the failure and react.

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::buffer::RingBuffer;
use crate::collaborators::{EditorState, SerialTransport, SketchCompiler};
use crate::conversation::ToolCall;
use crate::memory::LearningStore;
use crate::registry::{ToolName, ToolRegistry};

const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_READ_LINES: usize = 50;
const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Outcome of a single tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub tool: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    /// Render the result as text for a tool-result message
    pub fn to_message_content(&self) -> String {
        if self.success {
            self.result
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "ok".to_string())
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("unknown failure")
            )
        }
    }
}

/// Tool dispatcher over the injected collaborators
pub struct ToolExecutor {
    registry: ToolRegistry,
    compiler: Arc<dyn SketchCompiler>,
    transport: Arc<dyn SerialTransport>,
    editor: Arc<dyn EditorState>,
    store: Arc<Mutex<LearningStore>>,
    serial_buffer: Mutex<RingBuffer<String>>,
}

impl ToolExecutor {
    pub fn new(
        compiler: Arc<dyn SketchCompiler>,
        transport: Arc<dyn SerialTransport>,
        editor: Arc<dyn EditorState>,
        store: Arc<Mutex<LearningStore>>,
        serial_buffer_capacity: usize,
    ) -> Self {
        Self {
            registry: ToolRegistry::new(),
            compiler,
            transport,
            editor,
            store,
            serial_buffer: Mutex::new(RingBuffer::new(serial_buffer_capacity)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one tool call, returning the outcome as data.
    ///
    /// Every call, successful or not, lands in the execution log.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        debug!("Executing tool: {} ({})", call.name, call.id);

        let outcome = match self.registry.validate(call) {
            Ok(()) => self.dispatch(call).await,
            Err(e) => Err(anyhow!(e)),
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(value) => ToolResult {
                success: true,
                tool: call.name.clone(),
                result: Some(value),
                error: None,
                execution_time_ms,
            },
            Err(e) => {
                warn!("Tool {} failed: {:#}", call.name, e);
                ToolResult {
                    success: false,
                    tool: call.name.clone(),
                    result: None,
                    error: Some(format!("{:#}", e)),
                    execution_time_ms,
                }
            }
        };

        let arguments = json!(call.arguments);
        if let Err(e) = self.store.lock().record_execution(
            &call.name,
            &arguments,
            result.success,
            result.error.as_deref(),
        ) {
            warn!("Failed to log execution of {}: {:#}", call.name, e);
        }

        result
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Value> {
        // Validation already confirmed the name, so this cannot fail
        let name = ToolName::from_str(&call.name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", call.name))?;

        match name {
            ToolName::CompileSketch => self.compile_sketch(call).await,
            ToolName::UploadSketch => self.upload_sketch(call).await,
            ToolName::ReadSketch => self.read_sketch(),
            ToolName::WriteSketch => self.write_sketch(call),
            ToolName::SaveSketch => self.save_sketch(call),
            ToolName::SerialConnect => self.serial_connect(call).await,
            ToolName::SerialDisconnect => self.serial_disconnect().await,
            ToolName::SerialSend => self.serial_send(call).await,
            ToolName::SerialReadRecent => self.serial_read_recent(call),
            ToolName::AnalyzeError => self.analyze_error(call),
            ToolName::SearchErrorMemory => self.search_error_memory(call),
            ToolName::RecordFix => self.record_fix(call),
            ToolName::MemoryStats => self.memory_stats(),
        }
    }

    // ========== Build Tools ==========

    async fn compile_sketch(&self, call: &ToolCall) -> Result<Value> {
        let path = self.resolve_path(call)?;
        let board = self.resolve_board(call)?;
        self.flush_if_open(&path)?;

        let output = self.compiler.compile(&path, &board).await?;
        if !output.success {
            self.remember_failure(&output.output, "compile");
        }

        Ok(json!({
            "success": output.success,
            "board": board,
            "output": output.output,
            "warnings": output.warnings,
        }))
    }

    async fn upload_sketch(&self, call: &ToolCall) -> Result<Value> {
        let path = self.resolve_path(call)?;
        let board = self.resolve_board(call)?;
        let port = self.resolve_port(call)?;
        self.flush_if_open(&path)?;

        let compiled = self.compiler.compile(&path, &board).await?;
        if !compiled.success {
            self.remember_failure(&compiled.output, "compile");
            return Ok(json!({
                "success": false,
                "stage": "compile",
                "output": compiled.output,
            }));
        }

        // The uploader and the serial monitor cannot share the port
        if self.transport.connected_port().is_some() {
            self.drain_serial();
            self.transport.disconnect().await?;
            debug!("Closed serial connection before upload");
        }

        let uploaded = self.compiler.upload(&path, &board, &port).await?;
        if !uploaded.success {
            self.remember_failure(&uploaded.output, "upload");
        }

        Ok(json!({
            "success": uploaded.success,
            "stage": "upload",
            "board": board,
            "port": port,
            "output": uploaded.output,
        }))
    }

    // ========== Editor Tools ==========

    fn read_sketch(&self) -> Result<Value> {
        let code = self.editor.get_code()?;
        Ok(json!({
            "code": code,
            "path": self.editor.current_path().map(|p| p.display().to_string()),
        }))
    }

    fn write_sketch(&self, call: &ToolCall) -> Result<Value> {
        let code = call
            .get_str("code")
            .ok_or_else(|| anyhow!("write_sketch requires a code string"))?;
        self.editor.set_code(code)?;
        Ok(json!({ "written": true, "length": code.len() }))
    }

    fn save_sketch(&self, call: &ToolCall) -> Result<Value> {
        let path = self.resolve_path(call)?;
        self.editor.save(&path)?;
        Ok(json!({ "saved": path.display().to_string() }))
    }

    // ========== Serial Tools ==========

    async fn serial_connect(&self, call: &ToolCall) -> Result<Value> {
        let port = self.resolve_port(call)?;
        let baud_rate = call
            .get_u64("baud_rate")
            .map(|b| b as u32)
            .unwrap_or(DEFAULT_BAUD_RATE);

        self.transport.connect(&port, baud_rate).await?;
        Ok(json!({ "connected": port, "baud_rate": baud_rate }))
    }

    async fn serial_disconnect(&self) -> Result<Value> {
        self.drain_serial();
        self.transport.disconnect().await?;
        Ok(json!({ "disconnected": true }))
    }

    async fn serial_send(&self, call: &ToolCall) -> Result<Value> {
        let data = call
            .get_str("data")
            .ok_or_else(|| anyhow!("serial_send requires a data string"))?;

        if self.transport.connected_port().is_none() {
            bail!("no serial connection is open; call serial_connect first");
        }

        self.transport.send(data).await?;
        self.drain_serial();
        Ok(json!({ "sent": data.len() }))
    }

    fn serial_read_recent(&self, call: &ToolCall) -> Result<Value> {
        self.drain_serial();
        let count = call
            .get_u64("lines")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_READ_LINES);

        let buffer = self.serial_buffer.lock();
        let lines: Vec<&String> = buffer.tail(count);
        Ok(json!({
            "lines": lines,
            "count": lines.len(),
            "connected": self.transport.connected_port(),
        }))
    }

    // ========== Learning Tools ==========

    fn analyze_error(&self, call: &ToolCall) -> Result<Value> {
        let error = call
            .get_str("error")
            .ok_or_else(|| anyhow!("analyze_error requires an error string"))?;
        let error_type = call.get_str("error_type");

        let store = self.store.lock();
        let hash = store.record_error(error, error_type, None)?;
        let outcome = store.search_similar(error, DEFAULT_SEARCH_LIMIT)?;
        drop(store);

        let known = outcome
            .exact
            .as_ref()
            .map(|m| m.signature.occurrence_count > 1)
            .unwrap_or(false);

        Ok(json!({
            "signature": hash,
            "known": known,
            "occurrences": outcome
                .exact
                .as_ref()
                .map(|m| m.signature.occurrence_count)
                .unwrap_or(1),
            "fixes": outcome
                .exact
                .map(|m| fixes_to_json(&m.fixes))
                .unwrap_or_default(),
        }))
    }

    fn search_error_memory(&self, call: &ToolCall) -> Result<Value> {
        let query = call
            .get_str("query")
            .ok_or_else(|| anyhow!("search_error_memory requires a query string"))?;
        let limit = call
            .get_u64("limit")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);

        let outcome = self.store.lock().search_similar(query, limit)?;

        Ok(json!({
            "exact": outcome.exact.as_ref().map(|m| json!({
                "signature": m.signature.hash,
                "pattern": m.signature.raw_pattern,
                "error_type": m.signature.error_type,
                "occurrences": m.signature.occurrence_count,
                "confidence": m.confidence,
                "fixes": fixes_to_json(&m.fixes),
            })),
            "similar": outcome.fuzzy.iter().map(|f| json!({
                "signature": f.signature.hash,
                "pattern": f.signature.raw_pattern,
                "error_type": f.signature.error_type,
                "occurrences": f.signature.occurrence_count,
                "confidence": f.confidence,
            })).collect::<Vec<_>>(),
        }))
    }

    fn record_fix(&self, call: &ToolCall) -> Result<Value> {
        let error = call
            .get_str("error")
            .ok_or_else(|| anyhow!("record_fix requires an error string"))?;
        let description = call
            .get_str("description")
            .ok_or_else(|| anyhow!("record_fix requires a description string"))?;
        let code = call.get_str("code");

        let store = self.store.lock();
        let hash = crate::memory::signature_hash(error);
        // Ensure the signature exists without bumping its occurrence count
        if store.get_signature(&hash)?.is_none() {
            store.record_error(error, None, None)?;
        }
        let fix = store.record_fix(&hash, description, code, None)?;

        Ok(json!({ "fix_id": fix.id, "signature": hash }))
    }

    fn memory_stats(&self) -> Result<Value> {
        let stats = self.store.lock().stats()?;
        Ok(json!({
            "errors": stats.error_count,
            "fixes": stats.fix_count,
            "executions": stats.execution_count,
            "success_rate": stats.success_rate,
        }))
    }

    // ========== Helpers ==========

    fn resolve_path(&self, call: &ToolCall) -> Result<std::path::PathBuf> {
        if let Some(path) = call.get_str("path") {
            return Ok(std::path::PathBuf::from(path));
        }
        self.editor
            .current_path()
            .ok_or_else(|| anyhow!("no sketch is open; provide a path"))
    }

    fn resolve_board(&self, call: &ToolCall) -> Result<String> {
        if let Some(board) = call.get_str("board") {
            return Ok(board.to_string());
        }
        self.editor
            .snapshot()
            .selected_board
            .ok_or_else(|| anyhow!("no board is selected; provide a board FQBN"))
    }

    fn resolve_port(&self, call: &ToolCall) -> Result<String> {
        if let Some(port) = call.get_str("port") {
            return Ok(port.to_string());
        }
        self.editor
            .snapshot()
            .selected_port
            .ok_or_else(|| anyhow!("no port is selected; provide a port"))
    }

    /// Flush pending edits when the target is the open sketch, whether it
    /// was named explicitly or resolved by defaulting. The compiler must
    /// see the latest edits, not a stale on-disk snapshot.
    fn flush_if_open(&self, path: &std::path::Path) -> Result<()> {
        if self.editor.current_path().as_deref() == Some(path) {
            self.editor.save(path)?;
        }
        Ok(())
    }

    /// Move pending transport lines into the bounded serial buffer
    fn drain_serial(&self) {
        let incoming = self.transport.take_incoming();
        if incoming.is_empty() {
            return;
        }
        let mut buffer = self.serial_buffer.lock();
        for line in incoming {
            buffer.push(line);
        }
    }

    /// Record a collaborator failure as an error signature
    fn remember_failure(&self, output: &str, error_type: &str) {
        if let Err(e) = self.store.lock().record_error(output, Some(error_type), None) {
            warn!("Failed to record {} error: {:#}", error_type, e);
        }
    }
}

fn fixes_to_json(fixes: &[crate::memory::RankedFix]) -> Vec<Value> {
    fixes
        .iter()
        .map(|f| {
            json!({
                "description": f.fix.description,
                "code": f.fix.code,
                "success_count": f.success_count,
                "failure_count": f.failure_count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CompileOutput, EditorSnapshot, NoTransport, UploadOutput,
    };
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct StubCompiler {
        compile_success: bool,
    }

    #[async_trait]
    impl SketchCompiler for StubCompiler {
        async fn compile(&self, _path: &Path, _board: &str) -> Result<CompileOutput> {
            Ok(CompileOutput {
                success: self.compile_success,
                output: if self.compile_success {
                    "Sketch uses 924 bytes".to_string()
                } else {
                    "error: 'LED' was not declared in this scope".to_string()
                },
                warnings: vec![],
            })
        }

        async fn upload(&self, _path: &Path, _board: &str, _port: &str) -> Result<UploadOutput> {
            Ok(UploadOutput {
                success: true,
                output: "done".to_string(),
            })
        }
    }

    struct StubEditor {
        code: String,
        path: Option<PathBuf>,
        board: Option<String>,
    }

    impl EditorState for StubEditor {
        fn get_code(&self) -> Result<String> {
            Ok(self.code.clone())
        }

        fn set_code(&self, _code: &str) -> Result<()> {
            Ok(())
        }

        fn current_path(&self) -> Option<PathBuf> {
            self.path.clone()
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn snapshot(&self) -> EditorSnapshot {
            EditorSnapshot {
                selected_board: self.board.clone(),
                selected_port: None,
            }
        }
    }

    fn executor(compile_success: bool, editor: StubEditor) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(StubCompiler { compile_success }),
            Arc::new(NoTransport),
            Arc::new(editor),
            Arc::new(Mutex::new(LearningStore::open_in_memory().unwrap())),
            16,
        )
    }

    fn open_editor() -> StubEditor {
        StubEditor {
            code: "void setup() {}".to_string(),
            path: Some(PathBuf::from("/tmp/blink/blink.ino")),
            board: Some("arduino:avr:uno".to_string()),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_data_not_error() {
        let exec = executor(true, open_editor());
        let result = exec.execute(&ToolCall::new("id1", "launch_rocket")).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter_is_data() {
        let exec = executor(true, open_editor());
        let result = exec.execute(&ToolCall::new("id1", "write_sketch")).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("code"));
    }

    #[tokio::test]
    async fn test_compile_defaults_from_editor_state() {
        let exec = executor(true, open_editor());
        let result = exec.execute(&ToolCall::new("id1", "compile_sketch")).await;

        assert!(result.success);
        let value = result.result.unwrap();
        assert_eq!(value["board"], "arduino:avr:uno");
        assert_eq!(value["success"], true);
    }

    #[tokio::test]
    async fn test_compile_without_open_sketch_is_actionable() {
        let editor = StubEditor {
            code: String::new(),
            path: None,
            board: Some("arduino:avr:uno".to_string()),
        };
        let exec = executor(true, editor);
        let result = exec.execute(&ToolCall::new("id1", "compile_sketch")).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("no sketch is open"));
    }

    #[tokio::test]
    async fn test_compile_failure_is_remembered() {
        let exec = executor(false, open_editor());
        let result = exec.execute(&ToolCall::new("id1", "compile_sketch")).await;

        // The tool itself succeeded; the compile outcome is in the payload
        assert!(result.success);
        assert_eq!(result.result.unwrap()["success"], false);

        let search = exec
            .execute(
                &ToolCall::new("id2", "search_error_memory")
                    .with_arg("query", "error: 'LED' was not declared in this scope"),
            )
            .await;
        let value = search.result.unwrap();
        assert_eq!(value["exact"]["error_type"], "compile");
    }

    #[tokio::test]
    async fn test_record_fix_then_analyze() {
        let exec = executor(true, open_editor());

        let record = exec
            .execute(
                &ToolCall::new("id1", "record_fix")
                    .with_arg("error", "avrdude: not in sync")
                    .with_arg("description", "press reset before upload"),
            )
            .await;
        assert!(record.success);

        let analyze = exec
            .execute(&ToolCall::new("id2", "analyze_error").with_arg("error", "avrdude: not in sync"))
            .await;
        let value = analyze.result.unwrap();
        assert_eq!(value["fixes"][0]["description"], "press reset before upload");
    }

    #[tokio::test]
    async fn test_every_execution_is_logged() {
        let exec = executor(true, open_editor());

        exec.execute(&ToolCall::new("id1", "read_sketch")).await;
        exec.execute(&ToolCall::new("id2", "launch_rocket")).await;

        let stats = exec.execute(&ToolCall::new("id3", "memory_stats")).await;
        let value = stats.result.unwrap();
        // read_sketch + failed launch_rocket; memory_stats logs after reading
        assert_eq!(value["executions"], 2);
        assert_eq!(value["success_rate"], 0.5);
    }

    #[tokio::test]
    async fn test_serial_send_without_connection() {
        let exec = executor(true, open_editor());
        let result = exec
            .execute(&ToolCall::new("id1", "serial_send").with_arg("data", "ping"))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("serial_connect"));
    }
}
