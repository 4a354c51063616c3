//! Structured error handling and exit codes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::actions::ActionKind;
use crate::scanner::Digest;

/// Engine-level errors.
#[derive(thiserror::Error, Debug)]
pub enum DedupError {
    /// A path could not be read or written for lack of permission.
    #[error("Permission denied: {}", .0.display())]
    Access(PathBuf),

    /// A read, write or rename failed.
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The move destination already exists.
    #[error("Destination already exists: {}", .0.display())]
    Conflict(PathBuf),

    /// A hard link was requested across filesystems.
    #[error("Cannot hard link {} to {} across filesystems", .path.display(), .target.display())]
    CrossVolume {
        /// Path that would have been replaced
        path: PathBuf,
        /// Intended link target
        target: PathBuf,
    },

    /// The requested operation would break an engine guarantee.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// The file changed on disk since it was indexed.
    #[error("File changed since it was scanned: {}", .0.display())]
    Modified(PathBuf),

    /// The scan root or an action path does not exist.
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The scan root is not a directory.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The path is not a member of the named group.
    #[error("{} is not a member of group {digest}", .path.display())]
    UnknownMember {
        /// Group digest
        digest: Digest,
        /// Path looked up
        path: PathBuf,
    },

    /// A digest string was not 64 hex characters.
    #[error("Invalid digest: {0:?}")]
    InvalidDigest(String),

    /// Cancellation was requested.
    #[error("Operation interrupted by user")]
    Interrupted,

    /// The scan deadline passed.
    #[error("Scan timed out after {0:?}")]
    TimedOut(Duration),

    /// The hashing pool could not be created.
    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl DedupError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::Access(path.to_path_buf()),
            io::ErrorKind::NotFound => Self::PathNotFound(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Whether the caller asked for something the engine forbids, as
    /// opposed to a transient filesystem fault.
    #[must_use]
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// Short machine-readable kind name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Access(_) => "access",
            Self::Io { .. } => "io",
            Self::Conflict(_) => "conflict",
            Self::CrossVolume { .. } => "cross_volume",
            Self::Invariant(_) => "invariant_violation",
            Self::Modified(_) => "modified",
            Self::PathNotFound(_) => "path_not_found",
            Self::NotADirectory(_) => "not_a_directory",
            Self::UnknownMember { .. } => "unknown_member",
            Self::InvalidDigest(_) => "invalid_digest",
            Self::Interrupted => "interrupted",
            Self::TimedOut(_) => "timed_out",
            Self::WorkerPool(_) => "worker_pool",
        }
    }
}

/// Guarantees the engine refuses to break.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Deleting `path` would leave no independent copy of the content.
    #[error("Refusing to delete {}: it is the last copy in group {digest}", .path.display())]
    LastCopy {
        /// Group digest
        digest: Digest,
        /// Path that would have been deleted
        path: PathBuf,
    },

    /// Other members, or symbolic links found by the scan, point at `path`.
    #[error("Refusing to remove {}: symbolic links in group {digest} point to it", .path.display())]
    LinkedTarget {
        /// Group digest
        digest: Digest,
        /// Path that would have been removed
        path: PathBuf,
    },

    /// A link target must be a different, independent member of the group.
    #[error("{} is not a valid link target for {}", .target.display(), .path.display())]
    InvalidLinkTarget {
        /// Path to be replaced
        path: PathBuf,
        /// Rejected target
        target: PathBuf,
    },

    /// Whole-group deletion was requested but is not enabled.
    #[error("Deleting every copy in group {0} is disabled")]
    GroupDeleteDisabled(Digest),

    /// Disk changed but the index could not follow.
    #[error("Index out of sync after {action} of {}: {reason}", .path.display())]
    IndexDesync {
        /// Action that mutated the filesystem
        action: ActionKind,
        /// Affected path, now flagged stale
        path: PathBuf,
        /// Why the index update failed
        reason: String,
    },
}

/// A failed resolution with enough context to retry or pick another action.
#[derive(thiserror::Error, Debug)]
pub struct ResolveError {
    /// Group the action targeted; `None` when the digest string was invalid
    pub digest: Option<Digest>,
    /// Member the action targeted
    pub path: PathBuf,
    /// Requested action
    pub action: ActionKind,
    /// Underlying failure
    #[source]
    pub error: DedupError,
}

impl ResolveError {
    /// Wrap `error` with its action context.
    #[must_use]
    pub fn new(digest: Digest, path: &Path, action: ActionKind, error: DedupError) -> Self {
        Self {
            digest: Some(digest),
            path: path.to_path_buf(),
            action,
            error,
        }
    }

    /// A request rejected before its digest could be parsed.
    #[must_use]
    pub fn invalid_digest(raw: &str, path: &Path, action: ActionKind) -> Self {
        Self {
            digest: None,
            path: path.to_path_buf(),
            action,
            error: DedupError::InvalidDigest(raw.to_string()),
        }
    }

    /// Whether the caller violated the engine's contract.
    #[must_use]
    pub fn is_logic_error(&self) -> bool {
        self.error.is_logic_error()
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {}", self.action, self.path.display())?;
        if let Some(digest) = &self.digest {
            write!(f, " in group {}", digest.short())?;
        }
        write!(f, " failed: {}", self.error)
    }
}

/// Exit codes for the dupedex application.
///
/// - 0: Success (completed normally, duplicates found / action applied)
/// - 1: General error (unexpected failure)
/// - 2: No duplicates found (completed normally, no duplicates)
/// - 3: Partial success (completed with some non-fatal scan errors)
/// - 4: Refused (the engine rejected the action as unsafe)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: Scan completed and duplicates were found.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: Scan completed but no duplicates were found.
    NoDuplicates = 2,
    /// Partial success: Scan completed but encountered some non-fatal errors.
    PartialSuccess = 3,
    /// Refused: a resolution would have broken an engine guarantee.
    Refused = 4,
    /// Interrupted: Scan was interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DX000",
            Self::GeneralError => "DX001",
            Self::NoDuplicates => "DX002",
            Self::PartialSuccess => "DX003",
            Self::Refused => "DX004",
            Self::Interrupted => "DX130",
        }
    }

    /// Exit code matching an engine error found in an `anyhow` chain.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<DedupError>() {
                return Self::for_dedup_error(e);
            }
            if let Some(e) = cause.downcast_ref::<ResolveError>() {
                return Self::for_dedup_error(&e.error);
            }
        }
        Self::GeneralError
    }

    fn for_dedup_error(error: &DedupError) -> Self {
        match error {
            DedupError::Interrupted | DedupError::TimedOut(_) => Self::Interrupted,
            DedupError::Invariant(_) => Self::Refused,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DX001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Engine error kind, when the failure came from the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        let kind = err.chain().find_map(|cause| {
            cause
                .downcast_ref::<DedupError>()
                .or_else(|| cause.downcast_ref::<ResolveError>().map(|e| &e.error))
                .map(DedupError::kind)
        });
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind,
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
