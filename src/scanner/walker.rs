//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for traversing a directory
//! tree and producing the candidate files for hashing. It uses [`jwalk`]
//! for parallel directory reading with deterministic, name-sorted output.
//!
//! # Features
//!
//! - Parallel directory reading on the rayon global pool
//! - Configurable symlink handling ([`SymlinkPolicy`])
//! - Identity folding so one file reached by several paths is listed once
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Size filtering (min/max) and zero-byte policy
//! - Hidden file filtering
//! - Optional depth limit (`max_depth(1)` lists the root only)
//! - Graceful shutdown via atomic flag
//!
//! Unreadable entries are yielded as [`ScanError`] values and the walk
//! continues past them.
//!
//! # Example
//!
//! ```no_run
//! use dupedex::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/home/user/Downloads"), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path, file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::identity::IdentityTracker;
use super::{FileEntry, FilePath, ScanError, SymlinkPolicy, WalkerConfig};

/// A path skipped because it reaches a file the walk already yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// The skipped path
    pub path: FilePath,
    /// The yielded path reaching the same file
    pub canonical: FilePath,
    /// Whether `path` is a symbolic link (otherwise a hard link)
    pub symbolic: bool,
}

/// Directory walker for file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries
    /// as soon as it next checks.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Root being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and the root .gitignore.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Check if a file passes size filters.
    fn passes_size_filter(&self, size: u64) -> bool {
        if size == 0 && !self.config.include_empty {
            return false;
        }
        if let Some(min) = self.config.min_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.config.max_size {
            if size > max {
                return false;
            }
        }
        true
    }

    /// Walk the directory tree, yielding file entries.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. Each call starts a fresh enumeration.
    ///
    /// Under [`SymlinkPolicy::Dedupe`], symbolic links are yielded after
    /// every regular file so that the real path, not an alias, is the one
    /// recorded for a given file.
    pub fn walk(&self) -> WalkIter<'_> {
        let follow = self.config.symlinks == SymlinkPolicy::Follow;
        let filter = self.build_gitignore();
        let filter_root = self.root.clone();
        let mut walk_dir = WalkDir::new(&self.root);
        if let Some(depth) = self.config.max_depth {
            walk_dir = walk_dir.max_depth(depth);
        }
        let walk_dir = walk_dir
            .follow_links(follow)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, dir_path, _read_dir_state, children| {
                // Sorted children keep discovery order, and thus group
                // numbering, deterministic.
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
                if let Some(gi) = filter.as_ref() {
                    children.retain(|child| match child {
                        Ok(entry) => {
                            let path = dir_path.join(entry.file_name());
                            let ignored =
                                is_ignored(gi, &filter_root, &path, entry.file_type().is_dir());
                            if ignored {
                                log::trace!("Ignoring: {}", path.display());
                            }
                            !ignored
                        }
                        Err(_) => true,
                    });
                }
            });

        WalkIter {
            walker: self,
            inner: Box::new(walk_dir.into_iter()),
            tracker: IdentityTracker::new(),
            aliases: Vec::new(),
            deferred: Vec::new(),
            draining: false,
        }
    }

    /// Turn an entry's metadata into a [`FileEntry`] if it passes filters.
    fn accept(
        &self,
        path: &Path,
        metadata: &Metadata,
        is_symlink: bool,
        tracker: &mut IdentityTracker,
        aliases: &mut Vec<Alias>,
    ) -> Option<FileEntry> {
        if !metadata.is_file() {
            return None;
        }

        let size = metadata.len();
        if !self.passes_size_filter(size) {
            log::trace!(
                "Skipping file due to size filter ({}): {}",
                size,
                path.display()
            );
            return None;
        }

        if self.config.symlinks == SymlinkPolicy::Dedupe {
            if let Some(canonical) = tracker.sighting(metadata, path) {
                log::debug!("Skipping {} (alias of {})", path.display(), canonical);
                aliases.push(Alias {
                    path: FilePath::new(path),
                    canonical,
                    symbolic: is_symlink,
                });
                return None;
            }
        }

        Some(FileEntry {
            path: FilePath::new(path),
            size,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_symlink,
        })
    }

    fn handle_io_error(&self, path: &Path, error: std::io::Error) -> ScanError {
        let err = ScanError::from_io(path, error);
        match &err {
            ScanError::AccessDenied(_) => log::warn!("Permission denied: {}", path.display()),
            ScanError::NotFound(_) => {
                log::debug!("File not found (may have been deleted): {}", path.display());
            }
            ScanError::Io { source, .. } => {
                log::warn!("I/O error for {}: {}", path.display(), source);
            }
        }
        err
    }

    fn handle_jwalk_error(&self, error: jwalk::Error) -> ScanError {
        let path = error
            .path()
            .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
        let kind = error.io_error().map(std::io::Error::kind);
        log::warn!("Walker error for {}: {}", path.display(), error);
        match kind {
            Some(std::io::ErrorKind::PermissionDenied) => ScanError::AccessDenied(path),
            Some(std::io::ErrorKind::NotFound) => ScanError::NotFound(path),
            _ => ScanError::Io {
                path,
                source: std::io::Error::other(error.to_string()),
            },
        }
    }
}

/// Gitignore matching on a path relative to the walk root.
fn is_ignored(gi: &Gitignore, root: &Path, path: &Path, is_dir: bool) -> bool {
    let relative_path = path.strip_prefix(root).unwrap_or(path);
    let path_str = relative_path.to_string_lossy();
    let normalized_path = if cfg!(windows) {
        path_str.replace('\\', "/")
    } else {
        path_str.into_owned()
    };
    gi.matched(normalized_path, is_dir).is_ignore()
}

/// Iterator returned by [`Walker::walk`].
pub struct WalkIter<'a> {
    walker: &'a Walker,
    inner: Box<dyn Iterator<Item = jwalk::Result<jwalk::DirEntry<((), ())>>> + Send>,
    tracker: IdentityTracker,
    /// Paths folded onto a file already yielded (Dedupe policy)
    aliases: Vec<Alias>,
    /// Symlinks held back until all regular files were seen (Dedupe policy)
    deferred: Vec<PathBuf>,
    draining: bool,
}

impl WalkIter<'_> {
    /// Paths skipped so far because they reach an already yielded file
    /// through a hard or symbolic link.
    #[must_use]
    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    fn next_deferred(&mut self) -> Option<Result<FileEntry, ScanError>> {
        while let Some(path) = self.deferred.pop() {
            match std::fs::metadata(&path) {
                Ok(metadata) => {
                    if let Some(entry) =
                        self.walker
                            .accept(&path, &metadata, true, &mut self.tracker, &mut self.aliases)
                    {
                        return Some(Ok(entry));
                    }
                }
                // Dangling links are not files; nothing to report.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::trace!("Skipping dangling symlink: {}", path.display());
                }
                Err(e) => return Some(Err(self.walker.handle_io_error(&path, e))),
            }
        }
        None
    }
}

impl Iterator for WalkIter<'_> {
    type Item = Result<FileEntry, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.walker.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            if self.draining {
                return self.next_deferred();
            }

            let entry = match self.inner.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Some(Err(self.walker.handle_jwalk_error(e))),
                None => {
                    // Pop order is reversed; restore discovery order.
                    self.deferred.reverse();
                    self.draining = true;
                    continue;
                }
            };

            let path = entry.path();
            if path == self.walker.root || entry.file_type().is_dir() {
                continue;
            }

            let policy = self.walker.config.symlinks;
            let is_symlink = entry.file_type().is_symlink() || entry.path_is_symlink();
            match policy {
                SymlinkPolicy::Skip if is_symlink => {
                    log::trace!("Skipping symlink: {}", path.display());
                    continue;
                }
                SymlinkPolicy::Dedupe if is_symlink => {
                    self.deferred.push(path);
                    continue;
                }
                _ => {}
            }

            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => return Some(Err(self.walker.handle_io_error(&path, e))),
            };

            if let Some(file) = self
                .walker
                .accept(&path, &metadata, is_symlink, &mut self.tracker, &mut self.aliases)
            {
                return Some(Ok(file));
            }
        }
    }
}
