//! Process entry dispatch.
//!
//! The same binary runs in two roles. The harness watches the tree and
//! respawns the child on every successful build; the child (marked by
//! `GONE_ROUTINE`), or any process with `production` set, just serves.

use std::ffi::OsString;
use std::path::Path;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::display;
use crate::rebuild::{CHILD_MARKER, Rebuilder};
use crate::watcher::Watcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Watch, rebuild and respawn.
    Harness,
    /// Serve directly.
    Serve,
}

impl Mode {
    /// Decide from the process environment and `production`.
    pub fn detect(config: &AppConfig) -> Self {
        Self::from_marker(std::env::var_os(CHILD_MARKER), config.production)
    }

    pub fn from_marker(marker: Option<OsString>, production: bool) -> Self {
        let is_child = marker.is_some_and(|value| !value.is_empty());
        if is_child || production {
            Mode::Serve
        } else {
            Mode::Harness
        }
    }
}

/// Refuse to start a harness from inside a served process.
fn ensure_harness(mode: Mode) -> anyhow::Result<()> {
    if mode == Mode::Serve {
        anyhow::bail!(
            "Refusing to watch: {CHILD_MARKER} is set or `production` is enabled, \
             so this process must serve instead"
        );
    }
    Ok(())
}

/// Run the watcher and rebuild controller until Ctrl-C.
///
/// Fails when [`Mode::detect`] selects [`Mode::Serve`].
pub async fn run_harness(root: &Path, config: &AppConfig) -> anyhow::Result<()> {
    ensure_harness(Mode::detect(config))?;
    crate::logging::init_with_config(config);
    display::print_banner(&config.name, config.port);

    let watcher = Watcher::builder()
        .root(root)
        .includes(config.watcher.includes.iter().cloned())
        .excludes(config.watcher.excludes.iter().cloned())
        .debounce_ms(config.watcher.debounce_ms)
        .build()
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    // One queued pulse is enough to guarantee the next rebuild.
    let (pulses_tx, pulses_rx) = mpsc::channel(1);
    watcher.start(pulses_tx).context("Failed to start watcher")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            crate::log_event!("host", "interrupt", "shutting down");
        }
        signal.cancel();
    });

    let mut rebuilder = Rebuilder::from_config(watcher.root(), config).with_decorations(true);
    rebuilder.run(pulses_rx, shutdown).await;

    watcher.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_selects_serve() {
        assert_eq!(Mode::from_marker(Some("1".into()), false), Mode::Serve);
    }

    #[test]
    fn test_empty_marker_is_harness() {
        assert_eq!(Mode::from_marker(Some("".into()), false), Mode::Harness);
        assert_eq!(Mode::from_marker(None, false), Mode::Harness);
    }

    #[test]
    fn test_production_skips_watcher() {
        assert_eq!(Mode::from_marker(None, true), Mode::Serve);
    }

    #[test]
    fn test_serving_process_never_watches() {
        let err = ensure_harness(Mode::Serve).unwrap_err();
        assert!(err.to_string().contains(CHILD_MARKER));
        assert!(ensure_harness(Mode::Harness).is_ok());
    }
}
