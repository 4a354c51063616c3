//! dupedex - duplicate file indexing and resolution engine.
//!
//! Scans a directory tree, hashes every regular file with BLAKE3, groups
//! identical content into numbered duplicate groups, and resolves group
//! members by moving, linking or deleting them without ever losing the
//! last copy.
//!
//! ```no_run
//! let index = dupedex::index_folder("/data/photos").unwrap();
//! println!("{}", serde_json::to_string_pretty(&index).unwrap());
//! ```
//!
//! For resolution, keep a [`DedupEngine`] around instead.

pub mod actions;
pub mod app;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::path::Path;

pub use app::run_app;
pub use config::EngineConfig;
pub use duplicates::FolderIndex;
pub use engine::DedupEngine;
pub use error::{DedupError, ResolveError};

/// Index `path` with the default configuration.
///
/// Returns the digest → paths mapping of every duplicate group, in group
/// order, together with any per-file issues.
///
/// # Errors
///
/// - [`DedupError::PathNotFound`] / [`DedupError::NotADirectory`] for a bad root
/// - [`DedupError::WorkerPool`] if hashing cannot start
pub fn index_folder(path: &str) -> Result<FolderIndex, DedupError> {
    index_folder_with(Path::new(path), EngineConfig::default())
}

/// Index `path` with an explicit configuration.
///
/// # Errors
///
/// As [`index_folder`], plus [`DedupError::Interrupted`] or
/// [`DedupError::TimedOut`] when the pass did not finish.
pub fn index_folder_with(path: &Path, config: EngineConfig) -> Result<FolderIndex, DedupError> {
    let timeout = config.scan_timeout();
    let mut engine = DedupEngine::new(path, config);
    let summary = engine.scan()?;
    if summary.timed_out {
        return Err(DedupError::TimedOut(timeout.unwrap_or_default()));
    }
    if summary.interrupted {
        return Err(DedupError::Interrupted);
    }
    Ok(engine.folder_index())
}
