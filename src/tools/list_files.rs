use std::cmp::Ordering;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

const MAX_ENTRIES: usize = 200;
const MAX_DEPTH: usize = 11;
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    ".next",
    "dist",
    ".cache",
    "coverage",
    ".tox",
    "venv",
    ".venv",
    "target",
];

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ListFilesInput {
    #[schemars(description = "Directory path to list (defaults to current directory)")]
    path: Option<String>,
    #[schemars(description = "If true, list files recursively (max 200 entries). Defaults to false.")]
    #[serde(default)]
    recursive: bool,
}

fn dirs_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    b.file_type()
        .is_dir()
        .cmp(&a.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn walk(root: &Path, recursive: bool) -> Vec<String> {
    let mut entries = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { MAX_DEPTH } else { 1 })
        .sort_by(dirs_first)
        .into_iter();

    while let Some(next) = walker.next() {
        if entries.len() >= MAX_ENTRIES {
            break;
        }
        let Ok(entry) = next else { continue };
        let indent = "  ".repeat(entry.depth() - 1);
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_dir() {
            if SKIP_DIRS.contains(&name.as_ref()) {
                entries.push(format!("{indent}{name}/  (skipped)"));
                walker.skip_current_dir();
            } else {
                entries.push(format!("{indent}{name}/"));
            }
        } else {
            entries.push(format!("{indent}{name}"));
        }
    }
    entries
}

async fn list_files_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: ListFilesInput = serde_json::from_value(input)?;
    let root = ctx.resolve(input.path.as_deref());
    if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
        return Err(format!("Directory not found: {}", root.display()).into());
    }

    let recursive = input.recursive;
    let walk_root = root.clone();
    let entries = tokio::task::spawn_blocking(move || walk(&walk_root, recursive)).await?;

    let label = if recursive { " (recursive)" } else { "" };
    let mut output = format!("{}{label}:\n{}", root.display(), entries.join("\n"));
    if entries.len() >= MAX_ENTRIES {
        output.push_str("\n... (truncated at 200 entries)");
    }
    Ok(output)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_files",
        description: "List files and directories. Use to understand project structure.",
        input_schema: input_schema::<ListFilesInput>(),
        handler: |ctx, input| Box::pin(list_files_impl(ctx, input)),
    }
}
