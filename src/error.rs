use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a turn. None of these escape `Agent::chat`; they are
/// reported to observers as `AgentEvent::Error`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to connect to {url}. Is Ollama running?\n{source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Completion API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Agent loop hit safety limit ({0} iterations). Stopping to prevent runaway.")]
    LoopLimit(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("compact threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("max context tokens must be greater than zero")]
    InvalidContextLimit,

    #[error("working directory {path} is not accessible: {reason}")]
    WorkingDirectory { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversation file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("conversation not found: {0}")]
    NotFound(String),
}
