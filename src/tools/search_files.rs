use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

const MAX_RESULTS: usize = 50;
const MAX_DEPTH: usize = 11;
const MAX_FILE_BYTES: u64 = 512 * 1024;
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    ".next",
    "dist",
    ".cache",
    "coverage",
    "target",
];

static BINARY_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(png|jpg|jpeg|gif|ico|woff|woff2|ttf|eot|pdf|zip|tar|gz|bz2|xz|exe|dll|so|dylib|bin|obj|o|a|lib|class|jar|war|pyc|pyo|wasm|rlib)$")
        .expect("valid binary extension pattern")
});

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct SearchFilesInput {
    #[schemars(description = "Regex pattern to search for")]
    pattern: String,
    #[schemars(description = "Directory to search in (defaults to current directory)")]
    path: Option<String>,
    #[schemars(description = "Optional file extension filter, e.g. \"*.rs\" or \".ts\"")]
    file_pattern: Option<String>,
}

fn search(root: &Path, cwd: &Path, regex: &Regex, suffix: Option<&str>) -> Vec<String> {
    let mut results = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

    for entry in walker.filter_map(Result::ok) {
        if results.len() >= MAX_RESULTS {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if suffix.is_some_and(|s| !name.ends_with(s)) || BINARY_EXTENSION.is_match(&name) {
            continue;
        }
        if entry.metadata().map_or(true, |m| m.len() > MAX_FILE_BYTES) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        let relative = entry.path().strip_prefix(cwd).unwrap_or(entry.path());
        for (i, line) in content.split('\n').enumerate() {
            if results.len() >= MAX_RESULTS {
                break;
            }
            if regex.is_match(line) {
                results.push(format!("{}:{}: {}", relative.display(), i + 1, line.trim_end()));
            }
        }
    }
    results
}

async fn search_files_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: SearchFilesInput = serde_json::from_value(input)?;
    let regex = match RegexBuilder::new(&input.pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(e) => return Err(format!("Invalid regex pattern: {e}").into()),
    };

    let root = ctx.resolve(input.path.as_deref());
    let cwd = ctx.cwd().to_path_buf();
    let suffix = input.file_pattern.map(|p| p.replacen('*', "", 1));
    let results = tokio::task::spawn_blocking(move || {
        search(&root, &cwd, &regex, suffix.as_deref().filter(|s| !s.is_empty()))
    })
    .await?;

    if results.is_empty() {
        return Ok(format!("No matches found for pattern: {}", input.pattern));
    }
    let mut output = format!("Found {} match(es):\n{}", results.len(), results.join("\n"));
    if results.len() >= MAX_RESULTS {
        output.push_str("\n... (truncated at 50 results)");
    }
    Ok(output)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "search_files",
        description: "Search file contents using a regex pattern (like grep). Returns matching lines with file paths and line numbers.",
        input_schema: input_schema::<SearchFilesInput>(),
        handler: |ctx, input| Box::pin(search_files_impl(ctx, input)),
    }
}
