//! Init command.

use std::path::Path;

use crate::config::{AppConfig, CONFIG_FILE};

/// Run init command - create configuration file.
pub fn run_init(root: &Path, force: bool) {
    let config_path = root.join(CONFIG_FILE);

    if config_path.exists() && !force {
        eprintln!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
        eprintln!("Use --force to overwrite");
        std::process::exit(1);
    }

    match AppConfig::init_config_file(root, force) {
        Ok(path) => {
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
