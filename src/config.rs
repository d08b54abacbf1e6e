//! Configuration management

use anyhow::Result;
use std::path::PathBuf;

/// Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key (optional - enables the openai provider)
    pub openai_api_key: Option<String>,

    /// Anthropic API key (optional - enables the anthropic provider)
    pub anthropic_api_key: Option<String>,

    /// Gemini API key (optional - enables the gemini provider)
    pub gemini_api_key: Option<String>,

    /// Preferred provider name (openai, anthropic, gemini)
    pub default_provider: String,

    /// SQLite database path for the learning store
    pub db_path: PathBuf,

    /// Maximum provider round-trips per turn before aborting
    pub max_iterations: u32,

    /// Capacity of the serial telemetry ring buffer (lines)
    pub serial_buffer_capacity: usize,

    /// Rows kept in the execution outcome log
    pub execution_log_capacity: usize,

    /// Sampling temperature passed to providers
    pub temperature: f32,

    /// Max response tokens per provider call
    pub max_tokens: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let default_provider =
            std::env::var("SKETCHPILOT_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let db_path = std::env::var("SKETCHPILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("sketchpilot")
                    .join("learning.db")
            });

        let max_iterations = std::env::var("SKETCHPILOT_MAX_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let serial_buffer_capacity = std::env::var("SKETCHPILOT_SERIAL_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let execution_log_capacity = std::env::var("SKETCHPILOT_EXECUTION_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);

        let temperature = std::env::var("SKETCHPILOT_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.7);

        let max_tokens = std::env::var("SKETCHPILOT_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4096);

        Ok(Self {
            openai_api_key,
            anthropic_api_key,
            gemini_api_key,
            default_provider,
            db_path,
            max_iterations,
            serial_buffer_capacity,
            execution_log_capacity,
            temperature,
            max_tokens,
        })
    }
}

// Platform-specific dirs fallback
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .ok()
                .or_else(|| {
                    std::env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".local/share"))
                        .ok()
                })
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
                .ok()
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").map(PathBuf::from).ok()
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            None
        }
    }
}
