//! arduino-cli collaborator
//!
//! Thin process wrapper around `arduino-cli compile` and `arduino-cli
//! upload`. Output is captured as opaque text for the orchestration core;
//! no diagnostic parsing happens here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::{CompileOutput, SketchCompiler, UploadOutput};

/// Compiler/uploader backed by the `arduino-cli` binary
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    binary: String,
}

impl ArduinoCli {
    pub fn new() -> Self {
        Self {
            binary: "arduino-cli".to_string(),
        }
    }

    /// Use a non-default binary path
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(bool, String)> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok((output.status.success(), combined))
    }
}

impl Default for ArduinoCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SketchCompiler for ArduinoCli {
    async fn compile(&self, path: &Path, board: &str) -> Result<CompileOutput> {
        let path_str = path.to_string_lossy();
        let (success, output) = self
            .run(&["compile", "--fqbn", board, path_str.as_ref()])
            .await?;

        let warnings: Vec<String> = output
            .lines()
            .filter(|line| line.contains("warning:"))
            .map(|line| line.trim().to_string())
            .collect();

        info!(
            "Compile {}: {} ({} warnings)",
            path.display(),
            if success { "ok" } else { "failed" },
            warnings.len()
        );

        Ok(CompileOutput {
            success,
            output,
            warnings,
        })
    }

    async fn upload(&self, path: &Path, board: &str, port: &str) -> Result<UploadOutput> {
        let path_str = path.to_string_lossy();
        let (success, output) = self
            .run(&["upload", "--fqbn", board, "--port", port, path_str.as_ref()])
            .await?;

        info!(
            "Upload {} to {}: {}",
            path.display(),
            port,
            if success { "ok" } else { "failed" }
        );

        Ok(UploadOutput { success, output })
    }
}
