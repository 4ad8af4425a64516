//! Segment directory watcher.
//!
//! Polls a job's working directory for completed segment files and hands
//! them out in increasing index order, each exactly once. Polling rather
//! than filesystem notifications keeps the behavior identical on local disks
//! and network mounts.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::warn;

use crate::domain::segment::{Segment, SEGMENT_GLOB};

/// Tracks which segments of one job have been handed out
#[derive(Debug)]
pub struct SegmentWatcher {
    /// Directory the segmenter writes into
    dir: PathBuf,

    /// Matches candidate file names
    pattern: glob::Pattern,

    /// Indices already handed out; only grows
    processed: BTreeSet<u64>,

    /// Names matching the glob whose index could not be parsed
    skipped: HashSet<String>,

    /// Last index marked processed, for gap detection
    last_index: Option<u64>,
}

impl SegmentWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            // SEGMENT_GLOB is a valid literal pattern
            pattern: glob::Pattern::new(SEGMENT_GLOB).unwrap_or_default(),
            processed: BTreeSet::new(),
            skipped: HashSet::new(),
            last_index: None,
        }
    }

    /// List segments ready to process, sorted by index.
    ///
    /// While the segmenter is alive (`hold_back_latest`), the file with the
    /// highest index may still be written and is left for a later scan.
    pub async fn scan(&mut self, hold_back_latest: bool) -> std::io::Result<Vec<Segment>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.pattern.matches(&name) {
                continue;
            }

            match Segment::from_path(entry.path()) {
                Ok(segment) => found.push(segment),
                Err(e) => {
                    if self.skipped.insert(name.clone()) {
                        warn!(dir = %self.dir.display(), file = %name, error = %e, "skipping unparseable segment");
                    }
                }
            }
        }

        let newest = found.iter().map(|s| s.index).max();
        let mut ready: Vec<Segment> = found
            .into_iter()
            .filter(|s| !self.processed.contains(&s.index))
            .filter(|s| !(hold_back_latest && Some(s.index) == newest))
            .collect();

        // Index order is the source of truth, not listing order
        ready.sort_by_key(|s| s.index);
        Ok(ready)
    }

    /// Record that a segment has been handed to the processor
    pub fn mark_processed(&mut self, segment: &Segment) -> bool {
        if !self.processed.insert(segment.index) {
            return false;
        }

        if let Some(last) = self.last_index {
            if segment.index != last + 1 {
                warn!(
                    dir = %self.dir.display(),
                    expected = last + 1,
                    found = segment.index,
                    "segment index gap"
                );
            }
        }
        self.last_index = Some(segment.index);
        true
    }

    pub fn is_processed(&self, index: u64) -> bool {
        self.processed.contains(&index)
    }

    pub fn processed(&self) -> &BTreeSet<u64> {
        &self.processed
    }

    /// Unparseable file names seen so far, sorted
    pub fn skipped_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skipped.iter().cloned().collect();
        names.sort();
        names
    }
}
