//! Bidirectional map between watched directories and kernel watch ids.
//!
//! The registry owns its [`WatchBackend`] handle. Closing the registry
//! un-watches every entry and drops the handle, so once the last other
//! owner lets go the descriptor is closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::WatchError;
use super::kernel::{WatchBackend, WatchId};

/// Watched directories keyed by absolute path.
#[derive(Debug)]
pub struct WatchRegistry<B> {
    backend: Option<B>,
    entries: HashMap<PathBuf, WatchId>,
}

impl<B: WatchBackend> WatchRegistry<B> {
    /// Create an empty registry on top of `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Some(backend),
            entries: HashMap::new(),
        }
    }

    /// Subscribe `path`.
    ///
    /// Returns `Ok(false)` without touching the kernel when the path is
    /// already watched.
    pub fn add(&mut self, path: &Path) -> Result<bool, WatchError> {
        let backend = self.backend.as_ref().ok_or(WatchError::Closed)?;
        if self.entries.contains_key(path) {
            return Ok(false);
        }

        let wd = backend
            .add_watch(path)
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        // The kernel hands out the same id for the same inode. A directory
        // that was renamed keeps its id, so the old key is stale.
        self.entries.retain(|_, existing| *existing != wd);
        self.entries.insert(path.to_path_buf(), wd);
        Ok(true)
    }

    /// Forget `path`. The kernel retires watches on deleted directories by
    /// itself, so no un-watch is issued.
    pub fn remove(&mut self, path: &Path) -> Option<WatchId> {
        self.entries.remove(path)
    }

    /// Forget `path` and everything below it, un-watching each in the kernel.
    ///
    /// Needed when a directory moves away: the kernel keeps those watches
    /// alive on the moved inodes. Returns the number of entries dropped.
    pub fn retire(&mut self, path: &Path) -> usize {
        let stale: Vec<(PathBuf, WatchId)> = self
            .entries
            .iter()
            .filter(|(watched, _)| watched.starts_with(path))
            .map(|(watched, wd)| (watched.clone(), *wd))
            .collect();

        for (watched, wd) in &stale {
            self.entries.remove(watched);
            let Some(backend) = self.backend.as_ref() else {
                continue;
            };
            if let Err(e) = backend.remove_watch(*wd) {
                crate::debug_event!("watcher", "unwatch skipped", "{}: {e}", watched.display());
            }
        }

        stale.len()
    }

    /// Reverse lookup. Linear, registries hold hundreds of entries at most.
    pub fn lookup(&self, wd: WatchId) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(_, id)| **id == wd)
            .map(|(path, _)| path.as_path())
    }

    pub fn watch_id(&self, path: &Path) -> Option<WatchId> {
        self.entries.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    /// Watched directories, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Un-watch everything, empty the map and release the backend.
    pub fn close_all(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };

        for (path, wd) in self.entries.drain() {
            if let Err(e) = backend.remove_watch(wd) {
                // Already retired by the kernel (directory deleted).
                crate::debug_event!("watcher", "unwatch skipped", "{}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    /// Hands out sequential ids and records calls.
    #[derive(Default)]
    struct FakeBackend {
        next: Mutex<i32>,
        added: Mutex<Vec<PathBuf>>,
        removed: Mutex<Vec<WatchId>>,
        fixed: Mutex<HashMap<PathBuf, i32>>,
    }

    impl WatchBackend for FakeBackend {
        fn add_watch(&self, path: &Path) -> io::Result<WatchId> {
            if path.ends_with("missing") {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            self.added.lock().push(path.to_path_buf());
            if let Some(wd) = self.fixed.lock().get(path) {
                return Ok(WatchId(*wd));
            }
            let mut next = self.next.lock();
            *next += 1;
            Ok(WatchId(*next))
        }

        fn remove_watch(&self, wd: WatchId) -> io::Result<()> {
            self.removed.lock().push(wd);
            Ok(())
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let backend = std::sync::Arc::new(FakeBackend::default());
        let mut registry = WatchRegistry::new(backend.clone());

        assert!(registry.add(Path::new("/project/src")).unwrap());
        assert!(!registry.add(Path::new("/project/src")).unwrap());

        assert_eq!(registry.len(), 1);
        // Second add never reached the kernel
        assert_eq!(backend.added.lock().len(), 1);
    }

    #[test]
    fn test_distinct_paths_get_distinct_ids() {
        let mut registry = WatchRegistry::new(FakeBackend::default());
        registry.add(Path::new("/project")).unwrap();
        registry.add(Path::new("/project/src")).unwrap();

        let a = registry.watch_id(Path::new("/project")).unwrap();
        let b = registry.watch_id(Path::new("/project/src")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_reverses_add() {
        let mut registry = WatchRegistry::new(FakeBackend::default());
        registry.add(Path::new("/project/src")).unwrap();
        let wd = registry.watch_id(Path::new("/project/src")).unwrap();

        assert_eq!(registry.lookup(wd), Some(Path::new("/project/src")));

        registry.remove(Path::new("/project/src"));
        assert_eq!(registry.lookup(wd), None);
    }

    #[test]
    fn test_reused_id_replaces_stale_key() {
        let backend = FakeBackend::default();
        backend.fixed.lock().insert(PathBuf::from("/project/old"), 9);
        backend.fixed.lock().insert(PathBuf::from("/project/new"), 9);
        let mut registry = WatchRegistry::new(backend);

        registry.add(Path::new("/project/old")).unwrap();
        registry.add(Path::new("/project/new")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(WatchId(9)), Some(Path::new("/project/new")));
    }

    #[test]
    fn test_add_failure_leaves_registry_untouched() {
        let mut registry = WatchRegistry::new(FakeBackend::default());
        let err = registry.add(Path::new("/project/missing")).unwrap_err();

        assert!(matches!(err, WatchError::PathWatchFailed { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_retire_unwatches_subtree_only() {
        let backend = std::sync::Arc::new(FakeBackend::default());
        let mut registry = WatchRegistry::new(backend.clone());
        registry.add(Path::new("/project")).unwrap();
        registry.add(Path::new("/project/src")).unwrap();
        registry.add(Path::new("/project/src/inner")).unwrap();
        registry.add(Path::new("/project/srcgen")).unwrap();
        let src = registry.watch_id(Path::new("/project/src")).unwrap();
        let inner = registry.watch_id(Path::new("/project/src/inner")).unwrap();

        assert_eq!(registry.retire(Path::new("/project/src")), 2);

        let mut removed = backend.removed.lock().clone();
        removed.sort();
        assert_eq!(removed, vec![src, inner]);
        assert_eq!(
            registry.paths(),
            vec![PathBuf::from("/project"), PathBuf::from("/project/srcgen")]
        );

        // Nothing left to retire
        assert_eq!(registry.retire(Path::new("/project/src")), 0);
        assert_eq!(backend.removed.lock().len(), 2);
    }

    #[test]
    fn test_close_all_unwatches_and_rejects_adds() {
        let backend = std::sync::Arc::new(FakeBackend::default());
        let mut registry = WatchRegistry::new(backend.clone());
        registry.add(Path::new("/a")).unwrap();
        registry.add(Path::new("/a/b")).unwrap();

        registry.close_all();

        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert_eq!(backend.removed.lock().len(), 2);
        // Registry released its handle
        assert_eq!(std::sync::Arc::strong_count(&backend), 1);

        let err = registry.add(Path::new("/a/c")).unwrap_err();
        assert_eq!(err.to_string(), "watcher has been closed");

        // Idempotent
        registry.close_all();
        assert_eq!(backend.removed.lock().len(), 2);
    }
}
