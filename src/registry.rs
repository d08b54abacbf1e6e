//! Tool registry
//!
//! Static catalog of tool definitions: name, description, JSON-schema
//! parameters, and the required-parameter set. The registry is the single
//! source of truth for validation and is the wire-visible contract every
//! provider adapter translates. It checks presence of required arguments
//! only; argument types are the executor's and collaborators' concern.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::conversation::ToolCall;

/// Closed set of tool names.
///
/// Dispatch is an exhaustive match over this enum, so adding a tool is a
/// compile-time-checked exercise rather than a string-keyed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    CompileSketch,
    UploadSketch,
    ReadSketch,
    WriteSketch,
    SaveSketch,
    SerialConnect,
    SerialDisconnect,
    SerialSend,
    SerialReadRecent,
    AnalyzeError,
    SearchErrorMemory,
    RecordFix,
    MemoryStats,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CompileSketch => "compile_sketch",
            ToolName::UploadSketch => "upload_sketch",
            ToolName::ReadSketch => "read_sketch",
            ToolName::WriteSketch => "write_sketch",
            ToolName::SaveSketch => "save_sketch",
            ToolName::SerialConnect => "serial_connect",
            ToolName::SerialDisconnect => "serial_disconnect",
            ToolName::SerialSend => "serial_send",
            ToolName::SerialReadRecent => "serial_read_recent",
            ToolName::AnalyzeError => "analyze_error",
            ToolName::SearchErrorMemory => "search_error_memory",
            ToolName::RecordFix => "record_fix",
            ToolName::MemoryStats => "memory_stats",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        Some(match name {
            "compile_sketch" => ToolName::CompileSketch,
            "upload_sketch" => ToolName::UploadSketch,
            "read_sketch" => ToolName::ReadSketch,
            "write_sketch" => ToolName::WriteSketch,
            "save_sketch" => ToolName::SaveSketch,
            "serial_connect" => ToolName::SerialConnect,
            "serial_disconnect" => ToolName::SerialDisconnect,
            "serial_send" => ToolName::SerialSend,
            "serial_read_recent" => ToolName::SerialReadRecent,
            "analyze_error" => ToolName::AnalyzeError,
            "search_error_memory" => ToolName::SearchErrorMemory,
            "record_fix" => ToolName::RecordFix,
            "memory_stats" => ToolName::MemoryStats,
            _ => return None,
        })
    }

    /// Tools that only analyze, search, or record - no hardware side effects
    pub fn is_analysis(&self) -> bool {
        matches!(
            self,
            ToolName::AnalyzeError
                | ToolName::SearchErrorMemory
                | ToolName::RecordFix
                | ToolName::MemoryStats
                | ToolName::SerialReadRecent
        )
    }
}

/// Tool definition exposed to provider adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    /// Names of required parameters
    pub required: Vec<String>,
}

/// Validation failure for a proposed tool call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} is missing required parameter: {parameter}")]
    MissingParameter { tool: String, parameter: String },
}

/// Named subsets for mode-dependent tool visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    /// Entire catalog
    Full,
    /// Analysis/search/record tools only (debug mode)
    Analysis,
}

/// Static tool catalog
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            definitions: build_definitions(),
        }
    }

    /// All tool definitions
    pub fn get_all(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Look up a definition by name
    pub fn get_by_name(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Definitions in a named subset
    pub fn subset(&self, set: ToolSet) -> Vec<ToolDefinition> {
        match set {
            ToolSet::Full => self.definitions.clone(),
            ToolSet::Analysis => self
                .definitions
                .iter()
                .filter(|d| {
                    ToolName::from_str(&d.name)
                        .map(|n| n.is_analysis())
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        }
    }

    /// Check that the tool exists and every required parameter is present.
    ///
    /// Intentionally shallow - no type checking of argument values.
    pub fn validate(&self, call: &ToolCall) -> Result<(), ValidationError> {
        let definition = self
            .get_by_name(&call.name)
            .ok_or_else(|| ValidationError::UnknownTool(call.name.clone()))?;

        for parameter in &definition.required {
            if !call.arguments.contains_key(parameter) {
                return Err(ValidationError::MissingParameter {
                    tool: call.name.clone(),
                    parameter: parameter.clone(),
                });
            }
        }

        Ok(())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_definitions() -> Vec<ToolDefinition> {
    vec![
        // ========== Build Tools ==========
        ToolDefinition {
            name: "compile_sketch".to_string(),
            description: "Compile the current or given sketch for a board".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Sketch path; defaults to the open sketch"
                    },
                    "board": {
                        "type": "string",
                        "description": "Board FQBN; defaults to the selected board"
                    }
                }
            }),
            required: vec![],
        },
        ToolDefinition {
            name: "upload_sketch".to_string(),
            description: "Compile and upload a sketch to a connected board".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Sketch path; defaults to the open sketch"
                    },
                    "board": {
                        "type": "string",
                        "description": "Board FQBN; defaults to the selected board"
                    },
                    "port": {
                        "type": "string",
                        "description": "Serial port; defaults to the selected port"
                    }
                }
            }),
            required: vec![],
        },
        // ========== Editor Tools ==========
        ToolDefinition {
            name: "read_sketch".to_string(),
            description: "Read the code of the currently open sketch".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        },
        ToolDefinition {
            name: "write_sketch".to_string(),
            description: "Replace the code of the currently open sketch".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Complete new sketch code"
                    }
                },
                "required": ["code"]
            }),
            required: vec!["code".to_string()],
        },
        ToolDefinition {
            name: "save_sketch".to_string(),
            description: "Save pending sketch edits to disk".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Target path; defaults to the open sketch"
                    }
                }
            }),
            required: vec![],
        },
        // ========== Serial Tools ==========
        ToolDefinition {
            name: "serial_connect".to_string(),
            description: "Open a serial monitor connection".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "port": {
                        "type": "string",
                        "description": "Serial port; defaults to the selected port"
                    },
                    "baud_rate": {
                        "type": "integer",
                        "description": "Baud rate",
                        "default": 9600
                    }
                }
            }),
            required: vec![],
        },
        ToolDefinition {
            name: "serial_disconnect".to_string(),
            description: "Close the serial monitor connection".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        },
        ToolDefinition {
            name: "serial_send".to_string(),
            description: "Send data over the open serial connection".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "data": {
                        "type": "string",
                        "description": "Data to send"
                    }
                },
                "required": ["data"]
            }),
            required: vec!["data".to_string()],
        },
        ToolDefinition {
            name: "serial_read_recent".to_string(),
            description: "Read recent lines from the serial monitor buffer".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lines": {
                        "type": "integer",
                        "description": "Max lines to return",
                        "default": 50
                    }
                }
            }),
            required: vec![],
        },
        // ========== Learning Tools ==========
        ToolDefinition {
            name: "analyze_error".to_string(),
            description: "Look up an error in the learning store and record it".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "error": {
                        "type": "string",
                        "description": "Error text to analyze"
                    },
                    "error_type": {
                        "type": "string",
                        "description": "Optional classification (compile, upload, serial)"
                    }
                },
                "required": ["error"]
            }),
            required: vec!["error".to_string()],
        },
        ToolDefinition {
            name: "search_error_memory".to_string(),
            description: "Search stored error signatures and their fixes".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Error text or keywords"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Max fuzzy matches",
                        "default": 5
                    }
                },
                "required": ["query"]
            }),
            required: vec!["query".to_string()],
        },
        ToolDefinition {
            name: "record_fix".to_string(),
            description: "Associate a fix with a previously seen error".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "error": {
                        "type": "string",
                        "description": "The error text the fix applies to"
                    },
                    "description": {
                        "type": "string",
                        "description": "What resolved the error"
                    },
                    "code": {
                        "type": "string",
                        "description": "Optional code change"
                    }
                },
                "required": ["error", "description"]
            }),
            required: vec!["error".to_string(), "description".to_string()],
        },
        ToolDefinition {
            name: "memory_stats".to_string(),
            description: "Get learning store statistics".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        },
    ]
}
