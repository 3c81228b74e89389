use serde::Serialize;

/// Everything a turn reports to its observer. Events are fire-and-forget;
/// nothing an observer does with them feeds back into the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        name: String,
        content: String,
    },
    Error {
        message: String,
    },
    Compacted {
        before: usize,
        after: usize,
    },
    Thinking {
        active: bool,
    },
    Tokens {
        count: usize,
    },
}
