use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

use super::{ToolContext, ToolDefinition, ToolOutput, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct RunCommandInput {
    #[schemars(description = "The shell command to execute")]
    command: String,
    #[schemars(description = "Optional working directory for the command (defaults to current working directory)")]
    cwd: Option<String>,
}

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

async fn run_command_impl(ctx: ToolContext, input: serde_json::Value) -> ToolOutput {
    let input: RunCommandInput = serde_json::from_value(input)?;
    let cwd = ctx.resolve(input.cwd.as_deref());

    let mut cmd = shell(&input.command);
    cmd.current_dir(&cwd).kill_on_drop(true);

    let output = match tokio::time::timeout(ctx.command_timeout, cmd.output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(command = %input.command, "command timed out");
            return Err(format!(
                "Command timed out after {}s: {}",
                ctx.command_timeout.as_secs(),
                input.command
            )
            .into());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let text = if output.status.success() {
        let mut text = stdout.into_owned();
        if !stderr.is_empty() {
            text.push_str(&format!("\n(stderr): {stderr}"));
        }
        if text.is_empty() {
            "(no output)".to_string()
        } else {
            text
        }
    } else {
        let code = output
            .status
            .code()
            .map_or_else(|| "unknown".to_string(), |c| c.to_string());
        format!("Exit code: {code}\n{stdout}\n{stderr}").trim().to_string()
    };

    Ok(ctx.truncate(&text))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "run_command",
        description: "Execute a shell command and return its stdout and stderr. Use for git, cargo, build tools, tests, etc.",
        input_schema: input_schema::<RunCommandInput>(),
        handler: |ctx, input| Box::pin(run_command_impl(ctx, input)),
    }
}
