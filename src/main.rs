mod agent;
mod ai_sdk;
mod cancel;
mod client;
mod config;
mod context;
mod conversation;
mod error;
mod fallback;
mod prompt;
mod protocol;
mod stream;
mod tools;
mod ui;

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use agent::{Agent, TurnOutcome};
use clap::Parser;
use config::{Cli, Config, data_dir};
use tracing::info;

/// Logs go to `~/.qwen-local/qwen-local.log` so they never draw over the
/// terminal UI. Falls back to stderr when the file cannot be opened.
fn initialize_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("{}={level}", env!("CARGO_CRATE_NAME")).parse() {
        filter = filter.add_directive(directive);
    }

    let dir = data_dir();
    let file = fs::create_dir_all(&dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("qwen-local.log"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match file {
        Ok(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        Err(_) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(cli.verbose);

    let config = Config::from_cli(&cli)?;
    info!(
        base_url = %config.base_url,
        model = %config.model,
        cwd = %config.cwd.display(),
        "starting qwen-local"
    );
    let agent = Agent::from_config(&config);

    match cli.prompt {
        Some(prompt) => {
            let outcome = ui::run_once(agent, &prompt, cli.json).await?;
            if matches!(outcome, TurnOutcome::Failed | TurnOutcome::LoopLimitExceeded) {
                std::process::exit(1);
            }
            Ok(())
        }
        None => ui::run_tui(agent, config),
    }
}
