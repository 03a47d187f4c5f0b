//! CLI argument parsing using clap.
//!
//! Contains the Cli struct and the Commands enum.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Live-rebuild development harness
#[derive(Parser)]
#[command(
    name = "gone",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch a project, rebuild on save and respawn the server",
    long_about = "Watch a project tree, rebuild it whenever a file is saved and restart the built server.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Examples:\n  gone init\n  gone watch\n  gone watch --root ./services/api\n  gone config --config ./gone.dev.json"
)]
pub struct Cli {
    /// Path to a custom gone.json file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Watch the project and rebuild on change
    #[command(about = "Watch, rebuild and respawn until Ctrl-C")]
    Watch {
        /// Project root (defaults to the current directory)
        #[arg(short, long, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Initialize project
    #[command(about = "Write a default gone.json")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    #[command(about = "Print the effective configuration as JSON")]
    Config,
}

impl Cli {
    /// Project root for commands that take one.
    pub fn root(&self) -> PathBuf {
        match &self.command {
            Commands::Watch { root: Some(root) } => root.clone(),
            _ => PathBuf::from("."),
        }
    }
}
