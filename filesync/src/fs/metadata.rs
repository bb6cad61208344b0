//! File metadata used for change detection.
//!
//! Only size and modification time are tracked; content is never hashed.

use chrono::{DateTime, Utc};
use std::fs;

/// Size and mtime of a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified_at: DateTime<Utc>,
}

impl FileStamp {
    pub fn from_metadata(metadata: &fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: metadata.len(),
            modified_at: DateTime::<Utc>::from(metadata.modified()?),
        })
    }
}
