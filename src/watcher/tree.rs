//! Recursive directory-tree watcher.
//!
//! ```text
//! kernel --> read loop --> events --> handle loop --+--> debouncer --> pulses
//!                 ^                                  |
//!                 +---------- registry <-------------+ (subscribe / retire)
//! ```
//!
//! [`Watcher::start`] subscribes the whole tree and spawns both loops.
//! [`Watcher::close`] stops them, un-watches everything and closes the
//! descriptor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::debouncer::Debouncer;
use super::error::WatchError;
use super::event::{Event, EventKind, needs_stat};
use super::filter::PathFilter;
use super::kernel::{IN_Q_OVERFLOW, Inotify, READ_BUFFER_LEN};
use super::registry::WatchRegistry;
use super::walk::walk;

type SharedRegistry = Arc<Mutex<WatchRegistry<Arc<Inotify>>>>;

/// Pause after a failed read so a persistent error does not spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    Closed,
}

/// Watches a project tree and turns edits into rebuild pulses.
pub struct Watcher {
    root: PathBuf,
    filter: Arc<PathFilter>,
    registry: SharedRegistry,
    /// Handed to the read loop on start.
    reader: Mutex<Option<Arc<Inotify>>>,
    /// Observes whether the descriptor is still open.
    kernel: Weak<Inotify>,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    state: Mutex<Lifecycle>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    debounce: Duration,
}

impl Watcher {
    /// Create a watcher with default settings.
    ///
    /// `includes` and `excludes` are names relative to `root`. Must be
    /// called from within a Tokio runtime.
    pub fn new<I, E>(root: impl Into<PathBuf>, includes: I, excludes: E) -> Result<Self, WatchError>
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
        E: IntoIterator,
        E::Item: Into<PathBuf>,
    {
        Self::builder()
            .root(root)
            .includes(includes)
            .excludes(excludes)
            .build()
    }

    pub fn builder() -> WatcherBuilder {
        WatcherBuilder::new()
    }

    /// Subscribe the tree and start both loops. Returns immediately.
    ///
    /// Each debounced burst of edits sends one `()` on `pulses`. Pulses that
    /// find the channel full are dropped.
    pub fn start(&self, pulses: mpsc::Sender<()>) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Closed => return Err(WatchError::Closed),
            Lifecycle::Running => return Err(WatchError::AlreadyStarted),
            Lifecycle::Uninitialized => {}
        }

        let kernel = self.reader.lock().take().ok_or(WatchError::Closed)?;
        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or(WatchError::AlreadyStarted)?;

        // Subscription failures are reported through the event stream.
        let mut startup = Vec::new();
        let watched = {
            let mut registry = self.registry.lock();
            for dir in walk(&self.root, &self.filter) {
                if let Err(e) = registry.add(&dir) {
                    startup.push(Event::error(e.to_string()));
                }
            }
            registry.len()
        };

        crate::log_event!(
            "watcher",
            "monitoring",
            "{watched} directories under {}",
            self.root.display()
        );

        let read = tokio::spawn(read_loop(
            kernel,
            self.registry.clone(),
            self.events_tx.clone(),
            self.stop.clone(),
            startup,
        ));

        let handler = EventHandler {
            filter: self.filter.clone(),
            registry: self.registry.clone(),
            debouncer: Debouncer::new(self.debounce),
            pulses,
        };
        let handle = tokio::spawn(handler.run(events_rx, self.stop.clone()));

        self.tasks.lock().extend([read, handle]);
        *state = Lifecycle::Running;
        Ok(())
    }

    /// Stop both loops, un-watch every directory and close the descriptor.
    ///
    /// Idempotent. Waits for the loops to exit.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == Lifecycle::Closed {
                return;
            }
            *state = Lifecycle::Closed;
        }

        self.stop.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("[watcher] loop ended abnormally: {e}");
            }
        }

        self.registry.lock().close_all();
        self.reader.lock().take();

        crate::log_event!("watcher", "closed");
    }

    /// Subscribe a single directory. No-op if already watched.
    pub fn add_watch(&self, dir: impl AsRef<Path>) -> Result<(), WatchError> {
        self.ensure_open()?;
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        self.registry.lock().add(dir).map(|_| ())
    }

    /// Forget a directory without re-enumerating anything.
    pub fn delete_watch(&self, dir: impl AsRef<Path>) -> Result<(), WatchError> {
        self.ensure_open()?;
        self.registry.lock().remove(dir.as_ref());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == Lifecycle::Running
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == Lifecycle::Closed
    }

    pub fn is_watching(&self, dir: impl AsRef<Path>) -> bool {
        self.registry.lock().contains(dir.as_ref())
    }

    pub fn watch_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Currently watched directories, sorted.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.registry.lock().paths()
    }

    /// False once every owner of the descriptor has released it.
    pub fn descriptor_open(&self) -> bool {
        self.kernel.strong_count() > 0
    }

    fn ensure_open(&self) -> Result<(), WatchError> {
        if self.is_closed() {
            Err(WatchError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("root", &self.root)
            .field("state", &*self.state.lock())
            .field("watched", &self.watch_count())
            .finish()
    }
}

/// Drain kernel records into normalized events until stopped.
async fn read_loop(
    kernel: Arc<Inotify>,
    registry: SharedRegistry,
    events: mpsc::Sender<Event>,
    stop: CancellationToken,
    startup: Vec<Event>,
) {
    for event in startup {
        if events.send(event).await.is_err() {
            return;
        }
    }

    let mut buf = vec![0u8; READ_BUFFER_LEN];
    loop {
        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = kernel.read_records(&mut buf) => result,
        };

        match result {
            Ok(records) => {
                for record in records {
                    if record.has(IN_Q_OVERFLOW) {
                        let _ = events.try_send(Event::error("kernel event queue overflowed"));
                        continue;
                    }
                    // Record for a watch removed in the meantime
                    let Some(dir) = registry.lock().lookup(record.wd).map(Path::to_path_buf) else {
                        continue;
                    };

                    let translated = if needs_stat(&record) {
                        tokio::task::spawn_blocking(move || Event::from_record(&record, &dir))
                            .await
                            .unwrap_or_else(|e| vec![Event::error(format!("event translation failed: {e}"))])
                    } else {
                        Event::from_record(&record, &dir)
                    };

                    for event in translated {
                        tokio::select! {
                            _ = stop.cancelled() => return,
                            sent = events.send(event) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) if e.raw_os_error() == Some(libc::EBADF) => break,
            Err(e) => {
                if events
                    .send(Event::error(format!("events read error: {e}")))
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }

    crate::debug_event!("watcher", "read loop stopped");
}

/// Reacts to events: filters, debounces and maintains the watched set.
struct EventHandler {
    filter: Arc<PathFilter>,
    registry: SharedRegistry,
    debouncer: Debouncer,
    pulses: mpsc::Sender<()>,
}

impl EventHandler {
    async fn run(self, mut events: mpsc::Receiver<Event>, stop: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }

        self.debouncer.cancel();
        crate::debug_event!("watcher", "handle loop stopped");
    }

    async fn handle(&self, event: Event) {
        match event.kind {
            EventKind::Modified => {
                if !self.filter.check_valid(&event.path) {
                    crate::debug_event!("watcher", "ignored", "{}", event.path.display());
                    return;
                }
                crate::debug_event!("watcher", "modified", "{}", event.path.display());
                let pulses = self.pulses.clone();
                self.debouncer.call(move || {
                    // Full means a rebuild is already queued.
                    let _ = pulses.try_send(());
                });
            }
            EventKind::DirCreated => {
                if !self.filter.check_valid(&event.path) {
                    crate::debug_event!("watcher", "ignored", "{}", event.path.display());
                    return;
                }
                crate::debug_event!("watcher", "directory created", "{}", event.path.display());
                self.promote(event.path).await;
            }
            EventKind::DirDeletedSelf => {
                // Moved onto a name that was already promoted under its new path
                if tokio::fs::metadata(&event.path)
                    .await
                    .is_ok_and(|meta| meta.is_dir())
                {
                    crate::debug_event!("watcher", "directory moved", "{}", event.path.display());
                    return;
                }
                let retired = self.registry.lock().retire(&event.path);
                crate::debug_event!(
                    "watcher",
                    "directory deleted",
                    "{} ({retired} watches retired)",
                    event.path.display()
                );
            }
            EventKind::Error => {
                tracing::warn!(
                    "[watcher] {}",
                    event.detail.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    /// Subscribe a new directory and anything created inside it before the
    /// watch was in place.
    async fn promote(&self, dir: PathBuf) {
        let filter = self.filter.clone();
        let found = match tokio::task::spawn_blocking(move || walk(&dir, &filter)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("[watcher] subtree walk failed: {e}");
                return;
            }
        };

        for sub in found {
            match self.registry.lock().add(&sub) {
                Ok(_) => {}
                Err(WatchError::Closed) => return,
                Err(e) => tracing::warn!("[watcher] {e}"),
            }
        }
    }
}

/// Builder for constructing a [`Watcher`].
#[derive(Debug, Clone)]
pub struct WatcherBuilder {
    root: Option<PathBuf>,
    includes: Vec<PathBuf>,
    excludes: Vec<PathBuf>,
    debounce_ms: u64,
    event_capacity: usize,
}

impl WatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            root: None,
            includes: Vec::new(),
            excludes: Vec::new(),
            debounce_ms: 200,
            event_capacity: 64,
        }
    }

    /// Set the project root.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Hidden names to opt back in, relative to the root.
    pub fn includes<I>(mut self, includes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    /// Names to skip entirely, relative to the root.
    pub fn excludes<I>(mut self, excludes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        self.excludes.extend(excludes.into_iter().map(Into::into));
        self
    }

    /// Set the debounce duration in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Capacity of the internal event channel (at least 1).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Validate the root and open the kernel descriptor.
    pub fn build(self) -> Result<Watcher, WatchError> {
        let root = self.root.ok_or_else(|| WatchError::InitFailed {
            reason: "root is required".to_string(),
        })?;

        let root = match std::fs::canonicalize(&root) {
            Ok(root) => root,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::NotADirectory { path: root });
            }
            Err(e) => return Err(e.into()),
        };
        if !root.is_dir() {
            return Err(WatchError::NotADirectory { path: root });
        }

        let filter = Arc::new(PathFilter::new(&root, &self.includes, &self.excludes));

        let kernel = Arc::new(Inotify::init().map_err(|e| WatchError::InitFailed {
            reason: format!("inotify: {e}"),
        })?);
        let registry = Arc::new(Mutex::new(WatchRegistry::new(kernel.clone())));
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);

        Ok(Watcher {
            root,
            filter,
            registry,
            kernel: Arc::downgrade(&kernel),
            reader: Mutex::new(Some(kernel)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            state: Mutex::new(Lifecycle::Uninitialized),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            debounce: Duration::from_millis(self.debounce_ms),
        })
    }
}

impl Default for WatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let err = Watcher::new(temp.path().join("missing"), Vec::<PathBuf>::new(), Vec::<PathBuf>::new())
            .unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_new_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("main.go");
        std::fs::write(&file, "package main").unwrap();

        let err = Watcher::builder().root(&file).build().unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_builder_requires_root() {
        let err = Watcher::builder().build().unwrap_err();
        assert!(matches!(err, WatchError::InitFailed { .. }));
    }

    #[tokio::test]
    async fn test_add_watch_is_idempotent_and_closed_errors() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        let watcher = Watcher::builder().root(temp.path()).build().unwrap();
        let sub = watcher.root().join("sub");

        watcher.add_watch(&sub).unwrap();
        watcher.add_watch(&sub).unwrap();
        assert_eq!(watcher.watch_count(), 1);

        watcher.close().await;
        watcher.close().await;

        assert!(watcher.is_closed());
        assert_eq!(watcher.watch_count(), 0);
        assert!(!watcher.descriptor_open());

        let err = watcher.add_watch(&sub).unwrap_err();
        assert_eq!(err.to_string(), "watcher has been closed");
        assert!(matches!(watcher.delete_watch(&sub), Err(WatchError::Closed)));

        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(watcher.start(tx), Err(WatchError::Closed)));
    }

    #[tokio::test]
    async fn test_second_start_fails_fast() {
        let temp = TempDir::new().unwrap();
        let watcher = Watcher::builder().root(temp.path()).build().unwrap();

        let (tx, _rx) = mpsc::channel(1);
        watcher.start(tx.clone()).unwrap();
        assert!(watcher.is_running());
        assert!(matches!(watcher.start(tx), Err(WatchError::AlreadyStarted)));

        watcher.close().await;
    }
}
