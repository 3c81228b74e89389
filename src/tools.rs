use std::error::Error;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use schemars::{JsonSchema, schema_for};
use tracing::debug;

use crate::ai_sdk::ToolSchema;

mod edit_file;
mod find_files;
mod list_files;
mod read_file;
mod run_command;
mod search_files;
mod write_file;

pub(crate) type ToolOutput = Result<String, Box<dyn Error + Send + Sync>>;

type ToolHandler = fn(ToolContext, serde_json::Value) -> Pin<Box<dyn Future<Output = ToolOutput> + Send>>;

/// What the agent loop needs from a tool layer: the catalog sent with every
/// request, and a way to run one call. Errors are turned into result text by
/// the caller.
pub(crate) trait ToolExecutor: Send + Sync {
    fn schemas(&self) -> Vec<ToolSchema>;

    fn execute<'a>(&'a self, name: &'a str, input: serde_json::Value) -> BoxFuture<'a, ToolOutput>;
}

pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    pub(crate) handler: ToolHandler,
}

pub(crate) fn get_all_tools() -> Vec<ToolDefinition> {
    vec![
        read_file::definition(),
        write_file::definition(),
        edit_file::definition(),
        run_command::definition(),
        list_files::definition(),
        search_files::definition(),
        find_files::definition(),
    ]
}

fn input_schema<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

/// Session state the tools act on. Owned by the session's `Toolbox`, never
/// global.
#[derive(Debug, Clone)]
pub struct ToolContext {
    cwd: PathBuf,
    plan_mode: bool,
    command_timeout: Duration,
    max_result_size: usize,
}

impl ToolContext {
    pub fn new(cwd: PathBuf, command_timeout: Duration, max_result_size: usize) -> Self {
        Self {
            cwd,
            plan_mode: false,
            command_timeout,
            max_result_size,
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn plan_mode(&self) -> bool {
        self.plan_mode
    }

    pub(crate) fn resolve(&self, path: Option<&str>) -> PathBuf {
        match path.filter(|p| !p.is_empty()) {
            None => self.cwd.clone(),
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => self.cwd.join(p),
        }
    }

    pub(crate) fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.cwd).unwrap_or(path)
    }

    pub(crate) fn truncate(&self, text: &str) -> String {
        truncate(text, self.max_result_size)
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}\n... (truncated, {total} chars total)")
}

const READ_ONLY_PREFIXES: &[&str] = &[
    "ls", "dir", "cat", "head", "tail", "type", "find", "grep", "rg", "git status", "git log",
    "git diff", "git show", "git branch", "git remote", "git stash list", "git tag", "git blame",
    "cargo tree", "cargo metadata", "npm list", "npm ls", "npm view", "which", "where", "echo",
    "pwd", "whoami", "date", "wc",
];

// Chaining, pipes, redirection and substitution can smuggle a write past an
// allowed prefix.
const SHELL_OPERATORS: &[&str] = &[";", "&", "|", ">", "`", "$(", "\n"];

fn is_read_only_command(command: &str) -> bool {
    let command = command.trim().to_lowercase();
    if SHELL_OPERATORS.iter().any(|op| command.contains(op)) {
        return false;
    }
    READ_ONLY_PREFIXES
        .iter()
        .any(|prefix| command.starts_with(prefix))
}

/// The built-in catalog bound to one session's `ToolContext`.
pub struct Toolbox {
    tools: Vec<ToolDefinition>,
    context: ToolContext,
}

impl Toolbox {
    pub fn new(context: ToolContext) -> Self {
        Self {
            tools: get_all_tools(),
            context,
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.context.cwd = cwd;
    }

    pub fn set_plan_mode(&mut self, enabled: bool) {
        self.context.plan_mode = enabled;
    }

    fn plan_mode_block(&self, name: &str, input: &serde_json::Value) -> Option<String> {
        if !self.context.plan_mode {
            return None;
        }
        match name {
            "write_file" | "edit_file" => Some(
                "BLOCKED: Plan mode is active. File modifications are not allowed. Use /plan to exit plan mode first."
                    .to_string(),
            ),
            "run_command" => {
                let command = input.get("command").and_then(|c| c.as_str()).unwrap_or_default();
                (!is_read_only_command(command)).then(|| {
                    format!(
                        "BLOCKED: Plan mode is active. Only read-only commands are allowed. Command \"{command}\" appears to modify state. Use /plan to exit plan mode first."
                    )
                })
            }
            _ => None,
        }
    }
}

impl ToolExecutor for Toolbox {
    fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema::function(t.name, t.description, t.input_schema.clone()))
            .collect()
    }

    fn execute<'a>(&'a self, name: &'a str, input: serde_json::Value) -> BoxFuture<'a, ToolOutput> {
        Box::pin(async move {
            if let Some(blocked) = self.plan_mode_block(name, &input) {
                return Ok(blocked);
            }
            match self.tools.iter().find(|t| t.name == name) {
                Some(tool) => {
                    debug!(tool = name, "running tool");
                    (tool.handler)(self.context.clone(), input).await
                }
                None => Ok(format!("Unknown tool: {name}")),
            }
        })
    }
}
