//! Workspace editor collaborator
//!
//! File-backed editor state for headless use: one open sketch, its pending
//! content, and the board/port selections the embedding application set.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use super::{EditorSnapshot, EditorState};

#[derive(Debug, Default)]
struct Inner {
    path: Option<PathBuf>,
    code: String,
    selected_board: Option<String>,
    selected_port: Option<String>,
}

/// Editor state backed by a file on disk
#[derive(Debug, Default)]
pub struct WorkspaceEditor {
    inner: Mutex<Inner>,
}

impl WorkspaceEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a sketch file, loading its content as the pending buffer
    pub fn open(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let code = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read sketch {}", path.display()))?;

        let mut inner = self.inner.lock();
        inner.path = Some(path);
        inner.code = code;
        Ok(())
    }

    pub fn select_board(&self, board: impl Into<String>) {
        self.inner.lock().selected_board = Some(board.into());
    }

    pub fn select_port(&self, port: impl Into<String>) {
        self.inner.lock().selected_port = Some(port.into());
    }
}

impl EditorState for WorkspaceEditor {
    fn get_code(&self) -> Result<String> {
        Ok(self.inner.lock().code.clone())
    }

    fn set_code(&self, code: &str) -> Result<()> {
        self.inner.lock().code = code.to_string();
        Ok(())
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.inner.lock().path.clone()
    }

    fn save(&self, path: &Path) -> Result<()> {
        let code = self.inner.lock().code.clone();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, code)
            .with_context(|| format!("failed to write sketch {}", path.display()))
    }

    fn snapshot(&self) -> EditorSnapshot {
        let inner = self.inner.lock();
        EditorSnapshot {
            selected_board: inner.selected_board.clone(),
            selected_port: inner.selected_port.clone(),
        }
    }
}
