//! Recursive directory enumeration for the initial subscription.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::filter::PathFilter;

/// List `root` and every directory below it that passes `filter`.
///
/// Depth-first, sorted by name. Unreadable subtrees are pruned silently and
/// symlinks are not followed. The root itself is always first when it can
/// be read, whatever its name.
pub fn walk(root: &Path, filter: &PathFilter) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || (entry.file_type().is_dir() && filter.check_valid(entry.path()))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}
