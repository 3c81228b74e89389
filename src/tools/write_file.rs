use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct WriteFileInput {
    #[schemars(description = "Absolute or relative path to the file to write")]
    path: String,
    #[schemars(description = "The full content to write to the file")]
    content: String,
}

async fn write_file_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: WriteFileInput = serde_json::from_value(input)?;
    let path = ctx.resolve(Some(&input.path));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&path, &input.content).await?;

    Ok(format!(
        "File written: {} ({} lines, {} bytes)",
        path.display(),
        input.content.split('\n').count(),
        input.content.len()
    ))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "write_file",
        description: "Create a new file or completely overwrite an existing file with new content.",
        input_schema: input_schema::<WriteFileInput>(),
        handler: |ctx, input| Box::pin(write_file_impl(ctx, input)),
    }
}
