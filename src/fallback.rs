//! Recovery of tool calls that a model wrote into its text reply instead of
//! using the structured `tool_calls` channel.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::ai_sdk::ToolCall;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?[ \t]*\r?\n?([\s\S]*?)```").expect("valid code fence pattern")
});

static NAME_OPENING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"name"\s*:\s*"(\w+)""#).expect("valid tool opening pattern")
});

/// Fenced JSON blocks are tried first; bare `{"name": ...}` objects only
/// when no fence produced a call. Names outside `known_tools` are ignored.
pub(crate) fn extract_tool_calls(content: &str, known_tools: &[String]) -> Vec<ToolCall> {
    let fenced = from_code_fences(content, known_tools);
    if !fenced.is_empty() {
        return fenced;
    }
    from_bare_objects(content, known_tools)
}

fn is_known(name: &str, known_tools: &[String]) -> bool {
    known_tools.iter().any(|tool| tool == name)
}

fn from_code_fences(content: &str, known_tools: &[String]) -> Vec<ToolCall> {
    CODE_FENCE
        .captures_iter(content)
        .filter_map(|captures| {
            let body = captures.get(1)?.as_str().trim();
            let value: Value = serde_json::from_str(body).ok()?;
            let name = value.get("name")?.as_str()?;
            if !is_known(name, known_tools) {
                return None;
            }
            let arguments = value
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            Some(synthesize(name, &arguments))
        })
        .collect()
}

fn from_bare_objects(content: &str, known_tools: &[String]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut consumed = 0;

    for captures in NAME_OPENING.captures_iter(content) {
        let (Some(opening), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if opening.start() < consumed || !is_known(name.as_str(), known_tools) {
            continue;
        }
        let Some(end) = matching_brace(content, opening.start()) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&content[opening.start()..=end]) else {
            continue;
        };
        let (Some(name), Some(arguments)) = (
            value.get("name").and_then(Value::as_str),
            value.get("arguments"),
        ) else {
            continue;
        };

        calls.push(synthesize(name, arguments));
        consumed = end + 1;
    }

    calls
}

/// Byte index of the brace closing the object opened at `start`. Braces
/// inside string literals do not count.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn synthesize(name: &str, arguments: &Value) -> ToolCall {
    ToolCall::new(
        format!("call_text_{}", Uuid::new_v4().simple()),
        name,
        arguments.to_string(),
    )
}
