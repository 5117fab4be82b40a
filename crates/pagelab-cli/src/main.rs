//! PageLab operator CLI.

use clap::{Parser, Subcommand};
use pagelab_config::SettingsArgs;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pagelab")]
#[command(about = "PageLab audit pool CLI", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the status of a running server
    Status {
        /// Server base URL
        #[arg(long, env = "PAGE_LAB_SERVER_URL", default_value = "http://127.0.0.1:1717")]
        server: String,
        /// Print the raw status document
        #[arg(long)]
        json: bool,
    },
    /// Add URLs to the job queue
    Enqueue {
        /// URLs to audit
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Fill the job queue from the job source once
    Fill,
    /// Validate a settings file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "pagelab.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { server, json } => {
            commands::status::show(&server, json).await?;
        }
        Commands::Enqueue { urls } => {
            commands::queue::enqueue(&cli.settings.resolve()?, &urls).await?;
        }
        Commands::Fill => {
            commands::queue::fill(&cli.settings.resolve()?).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
