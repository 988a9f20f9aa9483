//! Recursive directory summary, depth-bounded unless asked otherwise.
//!
//! The summary is advisory: traversal never aborts. An entry that cannot be
//! stat'ed is still counted as a file but adds nothing to the size total,
//! and a directory that cannot be read is counted but not descended into.

use std::fs;
use std::path::Path;

use protocol::SummaryRecord;
use walkdir::WalkDir;

/// Default traversal depth.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Walks a tree and aggregates counts and sizes.
#[derive(Debug, Clone, Copy)]
pub struct DirectorySummarizer {
    max_depth: usize,
}

impl Default for DirectorySummarizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl DirectorySummarizer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Summarizer without a depth bound, for totals that must not miss
    /// anything.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Summarize everything below `root`. The root itself is not counted.
    ///
    /// `keep(name, is_dir)` filters entries; a rejected directory is skipped
    /// together with its contents. Symlinks are not followed: a link to a
    /// directory counts as a folder, any other link as a file sized by its
    /// target.
    pub fn walk(&self, root: &Path, keep: impl Fn(&str, bool) -> bool) -> SummaryRecord {
        let mut summary = SummaryRecord::default();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || keep(&e.file_name().to_string_lossy(), e.file_type().is_dir())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        path = ?e.path(),
                        error = %e,
                        "Skipping unreadable entry during summary"
                    );
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                summary.folder_count += 1;
                continue;
            }

            let metadata = if file_type.is_symlink() {
                fs::metadata(entry.path())
            } else {
                entry.metadata().map_err(std::io::Error::from)
            };

            match metadata {
                Ok(m) if m.is_dir() => summary.folder_count += 1,
                Ok(m) => {
                    summary.file_count += 1;
                    summary.total_size_bytes += m.len();
                }
                Err(e) => {
                    tracing::debug!(
                        path = %entry.path().display(),
                        error = %e,
                        "Counting file without size"
                    );
                    summary.file_count += 1;
                }
            }
        }

        summary
    }
}
