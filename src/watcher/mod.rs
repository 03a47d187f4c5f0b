//! Directory-tree watcher feeding the rebuild controller.
//!
//! # Architecture
//!
//! ```text
//! Watcher
//!   - Inotify descriptor (kernel)
//!   - WatchRegistry    path <-> watch id, behind one mutex
//!   - PathFilter       include / exclude / hidden rule
//!   - read loop        kernel records -> Event
//!   - handle loop      Event -> Debouncer -> pulse
//! ```

mod debouncer;
mod error;
mod event;
mod filter;
pub mod kernel;
mod registry;
mod tree;
mod walk;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use event::{Event, EventKind};
pub use filter::{PathFilter, is_hidden};
pub use kernel::{Inotify, RawRecord, WatchBackend, WatchId};
pub use registry::WatchRegistry;
pub use tree::{Watcher, WatcherBuilder};
pub use walk::walk;
