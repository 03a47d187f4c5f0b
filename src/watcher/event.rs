//! Normalized watcher events.

use std::path::{Path, PathBuf};

use super::kernel::{
    IN_CREATE, IN_DELETE_SELF, IN_ISDIR, IN_MODIFY, IN_MOVE_SELF, IN_MOVED_TO, RawRecord,
};
#[cfg(feature = "move-events")]
use super::kernel::IN_MOVED_FROM;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A file inside a watched directory was written.
    Modified,
    /// A directory appeared inside a watched directory.
    DirCreated,
    /// A watched directory was deleted or moved away.
    DirDeletedSelf,
    /// Reading or subscribing failed; see [`Event::detail`].
    Error,
}

/// One event flowing from the read loop to the handle loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Absolute path. Empty for errors not tied to a path.
    pub path: PathBuf,
    pub detail: Option<String>,
}

impl Event {
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Modified, path.into())
    }

    pub fn dir_created(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::DirCreated, path.into())
    }

    pub fn dir_deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::DirDeletedSelf, path.into())
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            path: PathBuf::new(),
            detail: Some(detail.into()),
        }
    }

    fn new(kind: EventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            detail: None,
        }
    }

    /// Translate a kernel record about an entry of `dir`.
    ///
    /// `IN_CREATE` only counts when the new entry is a directory; a failed
    /// stat becomes an [`EventKind::Error`]. A directory moved in counts as
    /// created, the watched directory moving away counts as deleted.
    pub fn from_record(record: &RawRecord, dir: &Path) -> Vec<Event> {
        let path = if record.name.is_empty() {
            dir.to_path_buf()
        } else {
            dir.join(&record.name)
        };
        let mut events = Vec::new();

        if record.has(IN_MODIFY) {
            events.push(Event::modified(path.clone()));
        }

        if record.has(IN_CREATE) {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => events.push(Event::dir_created(path.clone())),
                Ok(_) => {}
                Err(e) => events.push(Event::error(format!(
                    "watch add (stat) error for {}: {e}",
                    path.display()
                ))),
            }
        }

        if record.has(IN_MOVED_TO) {
            if record.has(IN_ISDIR) {
                events.push(Event::dir_created(path.clone()));
            } else if cfg!(feature = "move-events") {
                events.push(Event::modified(path.clone()));
            }
        }

        #[cfg(feature = "move-events")]
        if record.has(IN_MOVED_FROM) {
            if record.has(IN_ISDIR) {
                events.push(Event::dir_deleted(path.clone()));
            } else {
                events.push(Event::modified(path.clone()));
            }
        }

        if record.has(IN_DELETE_SELF) || record.has(IN_MOVE_SELF) {
            events.push(Event::dir_deleted(path));
        }

        events
    }
}

/// Whether translating `record` touches the filesystem.
pub fn needs_stat(record: &RawRecord) -> bool {
    record.has(IN_CREATE)
}
