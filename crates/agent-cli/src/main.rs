//! Agent CLI
//!
//! Runs single queries through the tool-using agent, lists tools and checks
//! the configured model provider.

mod commands;
mod settings;
mod state;

use std::path::PathBuf;

use agent_core::AgentError;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "agent")]
#[command(about = "Step-bounded tool-using agent", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML settings file (default: ./agent.toml if present)
    #[arg(short, long, env = "AGENT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        /// The question or task
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Override the configured step budget
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered tools
    Tools,
    /// Check the model provider connection
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<AgentError>() {
            Some(agent_err) => {
                tracing::error!(error = %agent_err, "Command failed");
                eprintln!("error: {}", agent_err.user_message());
            }
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = settings::load(cli.config.as_deref())?;
    let state = AppState::build(settings)?;

    match cli.command {
        Commands::Ask { text, max_steps, json } => {
            commands::ask(&state, &text.join(" "), max_steps, json).await?;
        }
        Commands::Tools => commands::tools(&state),
        Commands::Check => commands::check(&state).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = Cli::try_parse_from(["agent", "ask", "--max-steps", "2", "Calculate", "123*456"]).unwrap();
        match cli.command {
            Commands::Ask { text, max_steps, json } => {
                assert_eq!(text.join(" "), "Calculate 123*456");
                assert_eq!(max_steps, Some(2));
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }
}
