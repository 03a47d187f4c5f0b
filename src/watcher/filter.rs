//! Include/exclude policy for watched paths.
//!
//! Precedence: exclude wins over include wins over the default rule that
//! hidden entries (name starting with `.`) are skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Absolute include and exclude sets, joined against the project root once.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    includes: HashSet<PathBuf>,
    excludes: HashSet<PathBuf>,
}

impl PathFilter {
    /// Build a filter from names relative to `root`.
    pub fn new<I, E>(root: &Path, includes: I, excludes: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
        E: IntoIterator,
        E::Item: AsRef<Path>,
    {
        Self {
            includes: includes.into_iter().map(|p| root.join(p)).collect(),
            excludes: excludes.into_iter().map(|p| root.join(p)).collect(),
        }
    }

    /// True if `path` or one of its ancestors is excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.excludes.contains(p))
    }

    pub fn is_included(&self, path: &Path) -> bool {
        self.includes.contains(path)
    }

    /// Decide whether a path may trigger a rebuild or be subscribed.
    pub fn check_valid(&self, path: &Path) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        if self.is_included(path) {
            return true;
        }
        !is_hidden(path)
    }

    pub fn includes(&self) -> &HashSet<PathBuf> {
        &self.includes
    }

    pub fn excludes(&self) -> &HashSet<PathBuf> {
        &self.excludes
    }
}

/// Final component starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.as_encoded_bytes().starts_with(b"."))
}
