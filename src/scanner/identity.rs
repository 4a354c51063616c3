//! Underlying file identity for alias folding.
//!
//! # Overview
//!
//! Hard links and symbolic links let one file's content be reached through
//! several paths. Counting each path separately would report the file as a
//! duplicate of itself, and "resolving" such a group would delete the only
//! copy. The walker therefore records each (device, inode) pair once.
//!
//! The same identity is used by the resolution engine to tell whether two
//! members already share storage and whether a hard link can be made
//! between them.
//!
//! # Platform Support
//!
//! - **Unix**: `(st_dev, st_ino)` from file metadata
//! - **Other**: identity is unavailable and every path is treated as unique
//!
//! # Example
//!
//! ```no_run
//! use dupedex::scanner::identity::IdentityTracker;
//!
//! use std::path::Path;
//!
//! let mut tracker = IdentityTracker::new();
//! let meta = std::fs::metadata("file.txt").unwrap();
//! assert!(tracker.sighting(&meta, Path::new("file.txt")).is_none());
//! assert!(tracker.sighting(&meta, Path::new("alias.txt")).is_some());
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::Path;

use super::FilePath;

/// Device and inode of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Device (filesystem) identifier
    pub device: u64,
    /// Inode number within the device
    pub inode: u64,
}

impl FileIdentity {
    /// Read the identity from metadata.
    ///
    /// Returns `None` where the platform exposes no inode information.
    #[cfg(unix)]
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// Whether two metadata records live on the same filesystem.
///
/// `None` means the platform cannot tell.
#[must_use]
pub fn same_device(a: &Metadata, b: &Metadata) -> Option<bool> {
    match (FileIdentity::from_metadata(a), FileIdentity::from_metadata(b)) {
        (Some(a), Some(b)) => Some(a.device == b.device),
        _ => None,
    }
}

/// Number of directory entries referring to this file's storage.
///
/// Always 1 where link counts are unavailable.
#[must_use]
pub fn link_count(metadata: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.nlink()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        1
    }
}

/// Tracks file identities already seen during a walk, with the first path
/// that reached each one.
///
/// Not thread-safe: the walker owns one per enumeration.
#[derive(Debug, Default)]
pub struct IdentityTracker {
    seen: HashMap<FileIdentity, FilePath>,
}

impl IdentityTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` as reaching the file described by `metadata`.
    ///
    /// Returns the earlier path if the file was already reached, `None`
    /// on a first sighting. Always `None` on platforms without identity
    /// support.
    pub fn sighting(&mut self, metadata: &Metadata, path: &Path) -> Option<FilePath> {
        let identity = FileIdentity::from_metadata(metadata)?;
        match self.seen.entry(identity) {
            Entry::Occupied(first) => Some(first.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(FilePath::new(path));
                None
            }
        }
    }
}
