//! SketchPilot
//!
//! AI orchestration core for an Arduino sketch workbench.
//!
//! # Features
//!
//! - **Provider Adapters**: OpenAI, Anthropic, and Gemini chat/tool-call
//!   wire formats normalized behind one trait, with ordered fallback
//! - **Agent Loop**: iterative tool-calling conversation with
//!   mode-dependent tool visibility and an iteration cap
//! - **Tool Engine**: validated dispatch over a closed tool catalog, with
//!   parameter defaulting from editor state
//! - **Error Learning**: content-addressed error signatures, fix
//!   associations, and a bounded execution log in SQLite
//!
//! # Architecture
//!
//! ```text
//! User ──► Agent ──► Provider (openai | anthropic | gemini)
//!            │
//!            └── ToolExecutor ──► arduino-cli (compile/upload)
//!                   │             serial transport
//!                   │             workspace editor
//!                   └── LearningStore (SQLite)
//! ```

pub mod agent;
pub mod buffer;
pub mod collaborators;
pub mod config;
pub mod conversation;
pub mod executor;
pub mod memory;
pub mod providers;
pub mod registry;

pub use agent::{Agent, ChatMode, QueryOutcome, QueryStatus};
pub use buffer::RingBuffer;
pub use collaborators::{ArduinoCli, NoTransport, WorkspaceEditor};
pub use config::Config;
pub use conversation::{Conversation, Message, Role, ToolCall};
pub use executor::{ToolExecutor, ToolResult};
pub use memory::{LearningStats, LearningStore};
pub use providers::{ChatOptions, ChatResponse, Provider, ProviderError, ProviderRegistry};
pub use registry::{ToolDefinition, ToolName, ToolRegistry, ToolSet};
