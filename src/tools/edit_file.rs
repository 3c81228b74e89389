use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct EditFileInput {
    #[schemars(description = "Absolute or relative path to the file to edit")]
    path: String,
    #[schemars(description = "The exact string to find and replace. Must be unique in the file.")]
    old_string: String,
    #[schemars(description = "The string to replace old_string with")]
    new_string: String,
}

async fn edit_file_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: EditFileInput = serde_json::from_value(input)?;
    let path = ctx.resolve(Some(&input.path));

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(_) => return Err(format!("File not found: {}", path.display()).into()),
    };

    if input.old_string.is_empty() {
        return Err("old_string must not be empty. Use write_file to create files.".into());
    }

    match content.matches(&input.old_string).count() {
        0 => {
            let preview: String = input.old_string.chars().take(100).collect();
            let ellipsis = if input.old_string.chars().count() > 100 { "..." } else { "" };
            Err(format!(
                "old_string not found in {}.\nSearched for: \"{preview}{ellipsis}\"\nMake sure it matches exactly (including whitespace and indentation). Try reading the file first.",
                path.display()
            )
            .into())
        }
        1 => {
            let updated = content.replacen(&input.old_string, &input.new_string, 1);
            tokio::fs::write(&path, &updated).await?;
            Ok(format!(
                "File edited: {} (replaced 1 occurrence, {} lines total)",
                path.display(),
                updated.split('\n').count()
            ))
        }
        n => Err(format!(
            "old_string found {n} times in {}. It must be unique. Add more surrounding context to make it unique.",
            path.display()
        )
        .into()),
    }
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "edit_file",
        description: "Make a surgical edit to a file by replacing a specific string with a new string. The old_string must match exactly (including whitespace and indentation).",
        input_schema: input_schema::<EditFileInput>(),
        handler: |ctx, input| Box::pin(edit_file_impl(ctx, input)),
    }
}
