//! Collaborator interfaces
//!
//! External subsystems the orchestration core depends on but does not
//! implement: the sketch compiler/uploader, the serial transport, and the
//! editor state. Each is an injected trait object so tests can substitute
//! fakes; the executor never reaches for ambient global state.

pub mod arduino_cli;
pub mod workspace;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use arduino_cli::ArduinoCli;
pub use workspace::WorkspaceEditor;

/// Output of a compile run
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub success: bool,
    /// Combined compiler output, treated as opaque text
    pub output: String,
    pub warnings: Vec<String>,
}

/// Output of an upload run
#[derive(Debug, Clone)]
pub struct UploadOutput {
    pub success: bool,
    pub output: String,
}

/// Compiler/uploader collaborator
#[async_trait]
pub trait SketchCompiler: Send + Sync {
    async fn compile(&self, path: &Path, board: &str) -> Result<CompileOutput>;

    async fn upload(&self, path: &Path, board: &str, port: &str) -> Result<UploadOutput>;
}

/// Serial transport collaborator
///
/// Owns raw I/O only; the executor owns buffering of incoming data.
#[async_trait]
pub trait SerialTransport: Send + Sync {
    async fn connect(&self, port: &str, baud_rate: u32) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, data: &str) -> Result<()>;

    /// Port of the currently open connection, if any
    fn connected_port(&self) -> Option<String>;

    /// Drain lines received since the last call
    fn take_incoming(&self) -> Vec<String>;
}

/// Synchronous snapshot of editor selections, used for parameter defaulting
#[derive(Debug, Clone, Default)]
pub struct EditorSnapshot {
    pub selected_board: Option<String>,
    pub selected_port: Option<String>,
}

/// Editor-state collaborator
pub trait EditorState: Send + Sync {
    fn get_code(&self) -> Result<String>;

    fn set_code(&self, code: &str) -> Result<()>;

    /// Path of the currently open sketch, if any
    fn current_path(&self) -> Option<PathBuf>;

    /// Flush pending content to persistent storage
    fn save(&self, path: &Path) -> Result<()>;

    fn snapshot(&self) -> EditorSnapshot;
}

/// Placeholder transport for environments without serial hardware support.
///
/// Every operation fails with an actionable message; `take_incoming` is
/// always empty.
#[derive(Debug, Default)]
pub struct NoTransport;

#[async_trait]
impl SerialTransport for NoTransport {
    async fn connect(&self, _port: &str, _baud_rate: u32) -> Result<()> {
        anyhow::bail!("serial transport is not configured in this environment")
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _data: &str) -> Result<()> {
        anyhow::bail!("serial transport is not configured in this environment")
    }

    fn connected_port(&self) -> Option<String> {
        None
    }

    fn take_incoming(&self) -> Vec<String> {
        Vec::new()
    }
}
