use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::context::ContextBudget;
use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(name = "qwen-local")]
#[command(about = "An agentic coding assistant for local OpenAI-compatible models")]
#[command(version)]
pub struct Cli {
    /// Base URL of the OpenAI-compatible server
    #[arg(long, env = "QWEN_LOCAL_URL", default_value = "http://localhost:11434")]
    pub base_url: String,

    /// Model name sent with every completion request
    #[arg(long, env = "QWEN_LOCAL_MODEL", default_value = "qwen3-coder-cpu")]
    pub model: String,

    /// Context window size in estimated tokens
    #[arg(long, default_value_t = 32_768)]
    pub max_context_tokens: usize,

    /// Fraction of the context window that triggers compaction
    #[arg(long, default_value_t = 0.75)]
    pub compact_threshold: f64,

    /// Seconds before a shell command is killed
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub command_timeout: u64,

    /// Maximum characters of a tool result kept in the transcript
    #[arg(long, value_name = "CHARS", default_value_t = 8000)]
    pub max_tool_result_size: usize,

    /// Working directory (defaults to current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Start in plan mode (read-only exploration)
    #[arg(long)]
    pub plan: bool,

    /// Run a single prompt without the interactive UI
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Print one-shot events as JSON lines
    #[arg(long, requires = "prompt")]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub model: String,
    pub budget: ContextBudget,
    pub command_timeout: Duration,
    pub max_tool_result_size: usize,
    pub cwd: PathBuf,
    pub plan_mode: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if !(cli.compact_threshold > 0.0 && cli.compact_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(cli.compact_threshold));
        }
        if cli.max_context_tokens == 0 {
            return Err(ConfigError::InvalidContextLimit);
        }

        let cwd = match &cli.cwd {
            Some(path) => path.clone(),
            None => std::env::current_dir().map_err(|e| ConfigError::WorkingDirectory {
                path: PathBuf::from("."),
                reason: e.to_string(),
            })?,
        };
        let cwd = resolve_directory(&cwd)?;

        Ok(Self {
            base_url: cli.base_url.trim_end_matches('/').to_string(),
            model: cli.model.clone(),
            budget: ContextBudget {
                max_context_tokens: cli.max_context_tokens,
                compact_threshold: cli.compact_threshold,
            },
            command_timeout: Duration::from_secs(cli.command_timeout),
            max_tool_result_size: cli.max_tool_result_size,
            cwd,
            plan_mode: cli.plan,
        })
    }
}

/// Canonicalizes `path` and checks that it names a directory.
pub fn resolve_directory(path: &Path) -> Result<PathBuf, ConfigError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| ConfigError::WorkingDirectory {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !canonical.is_dir() {
        return Err(ConfigError::WorkingDirectory {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(canonical)
}

/// `~/.qwen-local`, or `./.qwen-local` when no home directory is known.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".qwen-local")
}

pub fn conversations_dir() -> PathBuf {
    data_dir().join("conversations")
}
