use anyhow::Context;
use clap::Parser;

use gone::cli::commands;
use gone::cli::{Cli, Commands};
use gone::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = cli.root();

    // Init writes a fresh document, it never needs to read one.
    if let Commands::Init { force } = &cli.command {
        commands::init::run_init(&root, *force);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load(&root).context("Failed to load gone.json")?,
    };

    gone::logging::init_with_config(&config);

    match cli.command {
        Commands::Watch { .. } => commands::watch::run_watch(&root, &config).await,
        Commands::Config => {
            commands::config::run_config(&config);
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}
