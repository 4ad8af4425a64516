//! Segment files written by the segmenter.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// File name prefix of every segment
pub const SEGMENT_PREFIX: &str = "segment_";

/// File extension of every segment
pub const SEGMENT_EXTENSION: &str = "wav";

/// Glob matched against file names when listing a working directory
pub const SEGMENT_GLOB: &str = "segment_*.wav";

/// Zero-padded width of the index in segment file names
pub const INDEX_WIDTH: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentNameError {
    #[error("unexpected segment filename: {0}")]
    UnexpectedName(String),

    #[error("segment index is not a number: {0}")]
    BadIndex(String),
}

/// One fixed-duration slice of the source audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Index parsed from the zero-padded file name suffix
    pub index: u64,

    /// Path of the segment file
    pub path: PathBuf,
}

impl Segment {
    /// Build a segment from its path, parsing the index out of the file name
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, SegmentNameError> {
        let path = path.into();
        let index = parse_index(&path)?;
        Ok(Self { index, path })
    }

    /// File name only
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

/// Parse the index out of a name like `segment_00001.wav`.
///
/// Digits beyond the padded width are accepted; the segmenter widens the
/// field once an index no longer fits.
pub fn parse_index(path: &Path) -> Result<u64, SegmentNameError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let digits = name
        .strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(&format!(".{}", SEGMENT_EXTENSION)))
        .ok_or_else(|| SegmentNameError::UnexpectedName(name.clone()))?;

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(SegmentNameError::BadIndex(name));
    }

    digits
        .parse::<u64>()
        .map_err(|_| SegmentNameError::BadIndex(name))
}

/// Canonical file name for a segment index with the given extension
pub fn segment_file_name(index: u64, extension: &str) -> String {
    format!(
        "{}{:0width$}.{}",
        SEGMENT_PREFIX,
        index,
        extension,
        width = INDEX_WIDTH
    )
}
