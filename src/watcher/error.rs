//! Error types for the directory-tree watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Watch root {path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("watcher has been closed")]
    Closed,

    #[error("watcher is already running")]
    AlreadyStarted,

    #[error("watcher I/O error: {0}")]
    Io(#[from] std::io::Error),
}
