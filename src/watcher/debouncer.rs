//! Trailing-edge debouncing for rebuild requests.
//!
//! A burst of saves (auto-save, formatter on save, `git checkout`) must
//! collapse into a single rebuild. Each call re-arms one timer; only the
//! closure from the most recent call runs, once the quiet window elapses.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Single-timer debouncer.
///
/// Timers run on the Tokio runtime, so [`Debouncer::call`] must be invoked
/// from within one.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Create a debouncer with the given delay in milliseconds.
    pub fn from_millis(debounce_ms: u64) -> Self {
        Self::new(Duration::from_millis(debounce_ms))
    }

    /// Cancel any pending closure and schedule `f` to run after the delay.
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }));
    }

    /// Drop the pending closure without running it.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    /// Whether a closure is still waiting to fire.
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
