use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

const MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ReadFileInput {
    #[schemars(description = "Absolute or relative path to the file to read")]
    path: String,
    #[schemars(description = "Optional starting line number (1-indexed)")]
    start_line: Option<usize>,
    #[schemars(description = "Optional ending line number (1-indexed, inclusive)")]
    end_line: Option<usize>,
}

async fn read_file_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: ReadFileInput = serde_json::from_value(input)?;
    let path = ctx.resolve(Some(&input.path));

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(_) => return Err(format!("File not found: {}", path.display()).into()),
    };
    if metadata.is_dir() {
        return Err(format!(
            "{} is a directory, not a file. Use list_files instead.",
            path.display()
        )
        .into());
    }
    if metadata.len() > MAX_FILE_BYTES {
        return Err(format!(
            "File is too large ({:.1} MB). Use start_line/end_line to read a portion.",
            metadata.len() as f64 / 1024.0 / 1024.0
        )
        .into());
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();

    let (start, end, header) = if input.start_line.is_some() || input.end_line.is_some() {
        let start = input.start_line.unwrap_or(1).max(1);
        let end = input.end_line.unwrap_or(total).min(total);
        (
            start,
            end,
            format!("{} (lines {start}-{end} of {total}):", path.display()),
        )
    } else {
        (1, total, format!("{} ({total} lines):", path.display()))
    };

    let numbered = lines
        .iter()
        .enumerate()
        .skip(start - 1)
        .take(end.saturating_sub(start - 1))
        .map(|(i, line)| format!("{:>5}  {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!("{header}\n{}", ctx.truncate(&numbered)))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file",
        description: "Read the contents of a file. Use this before editing any file. Supports optional line range.",
        input_schema: input_schema::<ReadFileInput>(),
        handler: |ctx, input| Box::pin(read_file_impl(ctx, input)),
    }
}
