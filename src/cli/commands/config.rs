//! Config command.

use crate::config::AppConfig;

/// Run config command - display current configuration.
pub fn run_config(config: &AppConfig) {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error displaying config: {e}"),
    }
}
