use std::path::Path;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

const MAX_RESULTS: usize = 100;
const MAX_DEPTH: usize = 11;
const SKIP_DIRS: &[&str] = &["node_modules", ".git", "__pycache__", ".next", "dist", ".cache", "target"];

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct FindFilesInput {
    #[schemars(description = "Glob pattern to match file names, e.g. \"*.rs\", \"**/*.test.js\", \"Cargo.toml\"")]
    pattern: String,
    #[schemars(description = "Directory to search in (defaults to current directory)")]
    path: Option<String>,
}

/// `**/` may match zero directories, `**` anything, `*` within one path
/// segment, `?` a single character.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str(r"[^/\\]*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

fn find(root: &Path, cwd: &Path, glob: &Regex) -> Vec<String> {
    let walker = WalkDir::new(root)
        .max_depth(MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

    walker
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/");
            glob.is_match(&relative) || glob.is_match(&e.file_name().to_string_lossy())
        })
        .take(MAX_RESULTS)
        .map(|e| {
            e.path()
                .strip_prefix(cwd)
                .unwrap_or(e.path())
                .display()
                .to_string()
        })
        .collect()
}

async fn find_files_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: FindFilesInput = serde_json::from_value(input)?;
    let glob = match glob_to_regex(&input.pattern) {
        Ok(glob) => glob,
        Err(e) => return Err(format!("Invalid glob pattern: {e}").into()),
    };

    let root = ctx.resolve(input.path.as_deref());
    let cwd = ctx.cwd().to_path_buf();
    let results = tokio::task::spawn_blocking(move || find(&root, &cwd, &glob)).await?;

    if results.is_empty() {
        return Ok(format!("No files found matching pattern: {}", input.pattern));
    }
    let mut output = format!("Found {} file(s):\n{}", results.len(), results.join("\n"));
    if results.len() >= MAX_RESULTS {
        output.push_str("\n... (truncated at 100 results)");
    }
    Ok(output)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "find_files",
        description: "Find files by name using a glob pattern. Returns matching file paths.",
        input_schema: input_schema::<FindFilesInput>(),
        handler: |ctx, input| Box::pin(find_files_impl(ctx, input)),
    }
}
