//! File removal: permanent or via the system trash.
//!
//! # Overview
//!
//! This module provides the filesystem half of a `Delete` resolution:
//! - Permanent deletion (default)
//! - Move to system trash (recoverable)
//! - TOCTOU verification that a file still matches its scanned state
//!
//! Whether a delete is *allowed* (last-copy and link-target guards) is
//! decided by the resolver before anything here runs.
//!
//! # Example
//!
//! ```no_run
//! use dupedex::actions::delete::{remove_file, DeleteMode};
//! use std::path::Path;
//!
//! match remove_file(Path::new("/path/to/duplicate.txt"), DeleteMode::Trash) {
//!     Ok(()) => println!("Moved to trash"),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::duplicates::FileRecord;
use crate::error::DedupError;
use crate::scanner::identity;

/// How deleted files are disposed of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Unlink immediately.
    #[default]
    Permanent,
    /// Move to the platform trash / recycle bin.
    Trash,
}

/// File metadata snapshot for TOCTOU verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Path to the file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileSnapshot {
    /// Snapshot recorded when the file was scanned.
    #[must_use]
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            path: record.path.as_path().to_path_buf(),
            size: record.size,
            modified: record.modified,
        }
    }

    /// Create a snapshot of a file's current state.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist or can't be accessed.
    pub fn capture(path: &Path) -> Result<Self, DedupError> {
        let metadata = fs::metadata(path).map_err(|e| DedupError::from_io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    /// Verify that the file still matches this snapshot.
    ///
    /// # Errors
    ///
    /// [`DedupError::Modified`] if size or mtime changed; the capture
    /// errors if the file is gone or unreadable.
    pub fn verify(&self) -> Result<(), DedupError> {
        let current = Self::capture(&self.path)?;

        if current.modified != self.modified {
            log::warn!(
                "File modified since scan: {} (mtime changed)",
                self.path.display()
            );
            return Err(DedupError::Modified(self.path.clone()));
        }

        if current.size != self.size {
            log::warn!(
                "File modified since scan: {} (size changed from {} to {})",
                self.path.display(),
                self.size,
                current.size
            );
            return Err(DedupError::Modified(self.path.clone()));
        }

        Ok(())
    }
}

/// Check that a member is still what the index says it is.
///
/// Link-tagged members only need to still exist: their metadata is the
/// target's, not what was scanned.
///
/// # Errors
///
/// [`DedupError::Modified`] for changed plain files,
/// [`DedupError::PathNotFound`] for vanished ones.
pub fn verify_unchanged(record: &FileRecord) -> Result<(), DedupError> {
    if record.link.is_some() {
        let path = record.path.as_path();
        return fs::symlink_metadata(path)
            .map(|_| ())
            .map_err(|e| DedupError::from_io(path, e));
    }
    FileSnapshot::from_record(record).verify()
}

/// Bytes actually released by removing `path`.
///
/// Zero for symbolic links and for files whose storage is still referenced
/// by another hard link.
#[must_use]
pub fn reclaimable_bytes(path: &Path, size: u64) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => 0,
        Ok(meta) if identity::link_count(&meta) > 1 => 0,
        Ok(_) => size,
        Err(_) => 0,
    }
}

/// Remove a single file according to `mode`.
///
/// # Errors
///
/// - [`DedupError::PathNotFound`] if the file doesn't exist
/// - [`DedupError::Access`] if deletion is not allowed
/// - [`DedupError::Io`] if the delete or trash operation fails
pub fn remove_file(path: &Path, mode: DeleteMode) -> Result<(), DedupError> {
    match mode {
        DeleteMode::Permanent => {
            fs::remove_file(path).map_err(|e| {
                log::error!("Permanent delete failed for {}: {}", path.display(), e);
                DedupError::from_io(path, e)
            })?;
            log::info!("Permanently deleted: {}", path.display());
        }
        DeleteMode::Trash => {
            fs::symlink_metadata(path).map_err(|e| DedupError::from_io(path, e))?;
            trash::delete(path).map_err(|e| {
                log::error!("Trash operation failed for {}: {}", path.display(), e);
                DedupError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::other(e.to_string()),
                }
            })?;
            log::info!("Moved to trash: {}", path.display());
        }
    }
    Ok(())
}
