//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk
//! - Streaming content hashing with BLAKE3
//! - Alias folding by file identity (hard links, symlinks)
//! - Path normalization
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`hasher`]: BLAKE3 file hashing (streaming)
//! - [`identity`]: Device/inode tracking
//! - [`path_utils`]: Lexical path normalization
//!
//! # Example
//!
//! ```no_run
//! use dupedex::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig {
//!     min_size: Some(1024),
//!     skip_hidden: true,
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(Path::new("."), config);
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path, file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod identity;
pub mod path_utils;
pub mod walker;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub use hasher::{Digest, Hasher, DEFAULT_CHUNK_SIZE};
pub use walker::{Alias, WalkIter, Walker};

/// An absolute, lexically normalized filesystem path.
///
/// The unique key of a [`FileRecord`](crate::duplicates::FileRecord) within
/// one index. Construct with [`FilePath::new`], which normalizes; string
/// forms exist only at the presentation boundary.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilePath(PathBuf);

impl FilePath {
    /// Normalize `path` into an absolute, clean path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path_utils::normalize_path(path.as_ref()))
    }

    /// Borrow as a `Path`.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert into the owned `PathBuf`.
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Boundary string form (lossy UTF-8, no verbatim prefix).
    #[must_use]
    pub fn to_display_string(&self) -> String {
        path_utils::display_string(&self.0)
    }
}

impl AsRef<Path> for FilePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<&Path> for FilePath {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for FilePath {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Metadata for a discovered file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: FilePath,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Whether the entry was reached through a symbolic link
    pub is_symlink: bool,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: impl Into<FilePath>, size: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            is_symlink: false,
        }
    }
}

/// How the walker treats symbolic links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Ignore symbolic links entirely.
    Skip,
    /// Resolve links to regular files, recording each underlying file once.
    /// Hard links to one inode are folded the same way.
    #[default]
    Dedupe,
    /// Follow every link, directories included, without identity folding.
    Follow,
}

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Symbolic link handling.
    pub symlinks: SymlinkPolicy,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Include zero-byte files. They all share one digest and form a group.
    pub include_empty: bool,

    /// Minimum file size to include (in bytes).
    pub min_size: Option<u64>,

    /// Maximum file size to include (in bytes).
    pub max_size: Option<u64>,

    /// Glob patterns to ignore (gitignore-style), applied in addition to
    /// the root's `.gitignore`.
    pub ignore_patterns: Vec<String>,

    /// Deepest directory level to descend into; `Some(1)` lists only the
    /// root's own files. `None` recurses fully.
    pub max_depth: Option<usize>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            symlinks: SymlinkPolicy::Dedupe,
            skip_hidden: false,
            include_empty: true,
            min_size: None,
            max_size: None,
            ignore_patterns: Vec::new(),
            max_depth: None,
        }
    }
}

impl WalkerConfig {
    /// Set the symlink policy.
    #[must_use]
    pub fn with_symlinks(mut self, policy: SymlinkPolicy) -> Self {
        self.symlinks = policy;
        self
    }

    /// Include or exclude zero-byte files.
    #[must_use]
    pub fn with_include_empty(mut self, include: bool) -> Self {
        self.include_empty = include;
        self
    }

    /// Limit recursion depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the ignore patterns.
    #[must_use]
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {}", .0.display())]
    AccessDenied(PathBuf),

    /// The entry disappeared between listing and inspection.
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing an entry.
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::AccessDenied(path.to_path_buf()),
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::AccessDenied(p) | Self::NotFound(p) | Self::Io { path: p, .. } => p,
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The file was not found.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Hashing was abandoned because cancellation was requested.
    #[error("Hashing interrupted: {}", .0.display())]
    Interrupted(PathBuf),
}

impl HashError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::Interrupted(p)
            | Self::Io { path: p, .. } => p,
        }
    }
}
