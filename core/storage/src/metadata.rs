//! File metadata returned by `stat` and directory listings.

use chrono::{DateTime, Utc};
use std::fs;

/// Metadata for a file or directory inside a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Name of the entry (last path component, `.` for the base directory).
    pub name: String,
    /// On-disk size in bytes (None for directories).
    ///
    /// For an encrypted file this is the envelope size, not the plaintext
    /// size.
    pub size: Option<u64>,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

impl Metadata {
    pub(crate) fn from_fs(name: impl Into<String>, fs_meta: &fs::Metadata) -> Self {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Self {
            name: name.into(),
            size: if fs_meta.is_file() {
                Some(fs_meta.len())
            } else {
                None
            },
            is_directory: fs_meta.is_dir(),
            modified,
        }
    }
}
