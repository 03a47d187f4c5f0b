//! Watch command.

use std::path::Path;

use crate::config::AppConfig;
use crate::host;

/// Run the live-rebuild harness against `root`.
pub async fn run_watch(root: &Path, config: &AppConfig) -> anyhow::Result<()> {
    host::run_harness(root, config).await
}
