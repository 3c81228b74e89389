//! Saved transcripts under `~/.qwen-local/conversations`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ai_sdk::Message;
use crate::error::ConversationError;

const MAX_NAME_CHARS: usize = 50;

#[derive(Debug, Serialize, Deserialize)]
struct SavedConversation {
    saved_at: DateTime<Utc>,
    message_count: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub filename: String,
    pub saved_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect()
}

/// Writes the transcript as pretty JSON and returns the file path.
pub fn save(dir: &Path, messages: &[Message], name: Option<&str>) -> Result<PathBuf, ConversationError> {
    fs::create_dir_all(dir)?;
    let now = Utc::now();
    let filename = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{}.json", sanitize(name)),
        None => format!("conversation-{}.json", now.format("%Y-%m-%dT%H-%M-%S-%3fZ")),
    };
    let path = dir.join(filename);

    let saved = SavedConversation {
        saved_at: now,
        message_count: messages.len(),
        messages: messages.to_vec(),
    };
    fs::write(&path, serde_json::to_string_pretty(&saved)?)?;
    debug!(path = %path.display(), messages = messages.len(), "conversation saved");
    Ok(path)
}

/// Saved conversations, newest first. Unreadable files are listed without a
/// timestamp and sort last.
pub fn list(dir: &Path) -> Result<Vec<ConversationSummary>, ConversationError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filename.ends_with(".json") {
            continue;
        }
        summaries.push(summarize(&entry.path(), filename));
    }

    summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    Ok(summaries)
}

fn summarize(path: &Path, filename: String) -> ConversationSummary {
    let parsed = fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<SavedConversation>(&text).ok());
    match parsed {
        Some(saved) => ConversationSummary {
            filename,
            saved_at: Some(saved.saved_at),
            message_count: saved.message_count,
        },
        None => ConversationSummary {
            filename,
            saved_at: None,
            message_count: 0,
        },
    }
}

/// Loads by 1-based position in `list` order, or by case-insensitive
/// filename substring.
pub fn load(dir: &Path, selector: &str) -> Result<Vec<Message>, ConversationError> {
    let summaries = list(dir)?;
    let selector = selector.trim();

    let found = match selector.parse::<usize>() {
        Ok(index) => index.checked_sub(1).and_then(|i| summaries.get(i)),
        Err(_) => {
            let needle = selector.to_lowercase();
            summaries
                .iter()
                .find(|s| s.filename.to_lowercase().contains(&needle))
        }
    };
    let Some(summary) = found else {
        return Err(ConversationError::NotFound(selector.to_string()));
    };

    let text = fs::read_to_string(dir.join(&summary.filename))?;
    let saved: SavedConversation = serde_json::from_str(&text)?;
    Ok(saved.messages)
}
