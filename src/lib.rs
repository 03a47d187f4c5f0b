//! Live-rebuild development harness.
//!
//! Watches a project tree through inotify, debounces bursts of edits into
//! rebuild pulses, rebuilds the project and respawns the built server.

pub mod cli;
pub mod config;
pub mod display;
#[cfg(feature = "http-server")]
pub mod engine;
pub mod host;
pub mod logging;
pub mod rebuild;
pub mod watcher;

pub use config::AppConfig;
#[cfg(feature = "http-server")]
pub use engine::Engine;
pub use host::Mode;
pub use rebuild::{Outcome, RebuildError, Rebuilder};
pub use watcher::{Debouncer, Event, EventKind, WatchError, Watcher, WatcherBuilder};
