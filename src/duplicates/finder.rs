//! Scan pipeline: walk, hash and index one root.
//!
//! # Overview
//!
//! [`DuplicateFinder::scan_into`] runs a full pass over a directory tree
//! and brings a [`DuplicateIndex`] up to date with it:
//!
//! 1. **Walk**: a dedicated thread enumerates the tree in deterministic
//!    order and streams each file, tagged with its discovery [`Ordinal`],
//!    into a bounded channel.
//! 2. **Hash**: a rayon pool of `io_threads` workers drains the channel,
//!    hashing files concurrently and inserting each finished record.
//! 3. **Prune**: after a complete pass, records for paths the walk no
//!    longer produced (deleted, now filtered, or unreadable) are dropped.
//!    Paths a resolution changed during the pass are left alone.
//!
//! On a rescan, files whose size and mtime match their record keep their
//! digest without being read again (see [`FinderConfig::skip_unchanged`]).
//! Symbolic links the walk folds onto an indexed file are recorded on that
//! file's record so resolutions can refuse to strand them.
//!
//! Per-file failures never abort the pass. They are collected as
//! [`ScanIssue`]s and returned beside the results.
//!
//! # Cancellation
//!
//! A [`CancelToken`] and an optional deadline stop the pass early. Records
//! already inserted stay; nothing partial is inserted; pruning is skipped
//! so an interrupted rescan never drops records it simply did not reach.
//!
//! # Example
//!
//! ```no_run
//! use dupedex::duplicates::{DuplicateFinder, DuplicateIndex, FinderConfig};
//! use std::path::Path;
//!
//! let index = DuplicateIndex::new();
//! let finder = DuplicateFinder::new(FinderConfig::default().with_io_threads(4));
//! let summary = finder.scan_into(Path::new("/some/path"), &index).unwrap();
//!
//! println!("Found {} duplicate groups", summary.duplicate_groups);
//! println!("Reclaimable space: {}", summary.reclaimable_display());
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use dashmap::DashSet;
use rayon::iter::{ParallelBridge, ParallelIterator};
use serde::Serialize;

use super::index::{DuplicateIndex, FileRecord, InsertOutcome, Ordinal};
use crate::error::DedupError;
use crate::progress::{ProgressCallback, PHASE_PRUNE, PHASE_SCAN};
use crate::scanner::{
    Alias, Digest, FilePath, HashError, Hasher, ScanError, Walker, WalkerConfig,
    DEFAULT_CHUNK_SIZE,
};
use crate::signal::CancelToken;

/// Default number of hashing workers, sized for I/O parallelism rather
/// than core count.
pub const DEFAULT_IO_THREADS: usize = 4;

/// Files buffered between the walker and the hashing pool.
const QUEUE_DEPTH: usize = 1024;

/// How often the watchdog checks the cancel token and deadline.
const WATCH_INTERVAL: Duration = Duration::from_millis(25);

const STOP_NONE: u8 = 0;
const STOP_CANCELLED: u8 = 1;
const STOP_TIMED_OUT: u8 = 2;

/// Category of a per-file scan problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Permission denied
    Access,
    /// Vanished between listing and reading
    NotFound,
    /// Any other read failure
    Io,
}

/// A file or directory the scan could not read. Never fatal to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanIssue {
    /// Affected path
    pub path: String,
    /// Problem category
    pub kind: IssueKind,
    /// Human-readable description
    pub message: String,
}

impl ScanIssue {
    /// Issue raised while walking.
    #[must_use]
    pub fn from_scan(error: &ScanError) -> Self {
        let kind = match error {
            ScanError::AccessDenied(_) => IssueKind::Access,
            ScanError::NotFound(_) => IssueKind::NotFound,
            ScanError::Io { .. } => IssueKind::Io,
        };
        Self {
            path: crate::scanner::path_utils::display_string(error.path()),
            kind,
            message: error.to_string(),
        }
    }

    /// Issue raised while hashing.
    #[must_use]
    pub fn from_hash(error: &HashError) -> Self {
        let kind = match error {
            HashError::PermissionDenied(_) => IssueKind::Access,
            HashError::NotFound(_) => IssueKind::NotFound,
            HashError::Io { .. } | HashError::Interrupted(_) => IssueKind::Io,
        };
        Self {
            path: crate::scanner::path_utils::display_string(error.path()),
            kind,
            message: error.to_string(),
        }
    }
}

/// Configuration for one scan pass.
#[derive(Clone)]
pub struct FinderConfig {
    /// Number of hashing workers (at least 1)
    pub io_threads: usize,
    /// Hasher read chunk size in bytes
    pub chunk_size: usize,
    /// Walker filters and symlink policy
    pub walker_config: WalkerConfig,
    /// Cancellation token shared with the caller
    pub cancel: Option<CancelToken>,
    /// Stop the pass once this much time has elapsed
    pub timeout: Option<Duration>,
    /// Progress receiver
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
    /// Reuse the indexed digest of files whose size and mtime are unchanged
    pub skip_unchanged: bool,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            io_threads: DEFAULT_IO_THREADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            walker_config: WalkerConfig::default(),
            cancel: None,
            timeout: None,
            progress_callback: None,
            skip_unchanged: true,
        }
    }
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("io_threads", &self.io_threads)
            .field("chunk_size", &self.chunk_size)
            .field("walker_config", &self.walker_config)
            .field("timeout", &self.timeout)
            .field("skip_unchanged", &self.skip_unchanged)
            .field("has_progress", &self.progress_callback.is_some())
            .finish_non_exhaustive()
    }
}

impl FinderConfig {
    /// Set the number of hashing workers.
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the hasher chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the walker configuration.
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set the scan deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reuse digests of unchanged files on rescans.
    #[must_use]
    pub fn with_skip_unchanged(mut self, skip: bool) -> Self {
        self.skip_unchanged = skip;
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

/// Statistics from one scan pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Pass generation within the index
    pub generation: u32,
    /// Files the walker produced
    pub total_files: usize,
    /// Files indexed, whether read or reused
    pub hashed_files: usize,
    /// Files whose digest was reused because size and mtime were unchanged
    pub reused_files: usize,
    /// Bytes hashed
    pub total_size: u64,
    /// Duplicate groups after the pass
    pub duplicate_groups: usize,
    /// Redundant copies (members beyond the first in every group)
    pub duplicate_files: usize,
    /// Bytes freed if every redundant copy were removed
    pub reclaimable_space: u64,
    /// Records dropped because their file was not found again
    pub pruned: usize,
    /// Wall time of the pass
    pub scan_duration: Duration,
    /// Stopped early by cancellation or deadline
    pub interrupted: bool,
    /// Stopped early by the deadline
    pub timed_out: bool,
    /// Per-file problems
    pub issues: Vec<ScanIssue>,
}

impl ScanSummary {
    /// Format reclaimable space as human-readable string.
    #[must_use]
    pub fn reclaimable_display(&self) -> String {
        ByteSize::b(self.reclaimable_space).to_string()
    }

    /// Format total size as human-readable string.
    #[must_use]
    pub fn total_size_display(&self) -> String {
        ByteSize::b(self.total_size).to_string()
    }

    /// Whether some files could not be read.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Drives the walk → hash → index pipeline.
#[derive(Debug, Clone, Default)]
pub struct DuplicateFinder {
    config: FinderConfig,
}

impl DuplicateFinder {
    /// Create a new finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    fn progress(&self) -> Option<&dyn ProgressCallback> {
        self.config.progress_callback.as_deref()
    }

    /// Scan `root` and bring `index` up to date with it.
    ///
    /// An interrupted or timed-out pass still returns `Ok`, with
    /// [`ScanSummary::interrupted`] set.
    ///
    /// # Errors
    ///
    /// - [`DedupError::PathNotFound`] if `root` does not exist
    /// - [`DedupError::NotADirectory`] if `root` is not a directory
    /// - [`DedupError::WorkerPool`] if the hashing pool cannot start
    pub fn scan_into(&self, root: &Path, index: &DuplicateIndex) -> Result<ScanSummary, DedupError> {
        let start_time = Instant::now();
        validate_root(root)?;

        let generation = index.begin_pass();
        log::info!("Starting scan pass {} of {}", generation, root.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads.max(1))
            .thread_name(|i| format!("dupedex-hash-{}", i))
            .build()
            .map_err(|e| DedupError::WorkerPool(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_reason = AtomicU8::new(STOP_NONE);
        let finished = AtomicBool::new(false);
        let deadline = self.config.timeout.map(|t| start_time + t);
        let check_stop = || {
            let reason = if self
                .config
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                STOP_CANCELLED
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                STOP_TIMED_OUT
            } else {
                return false;
            };
            stop_reason.store(reason, Ordering::SeqCst);
            stop.store(true, Ordering::SeqCst);
            true
        };
        check_stop();

        let walker = Walker::new(root, self.config.walker_config.clone())
            .with_shutdown_flag(Arc::clone(&stop));
        let hasher = Hasher::new()
            .with_chunk_size(self.config.chunk_size)
            .with_shutdown_flag(Arc::clone(&stop));

        let discovered = AtomicUsize::new(0);
        let hashed = AtomicUsize::new(0);
        let reused = AtomicUsize::new(0);
        let hashed_bytes = AtomicU64::new(0);
        let observed: DashSet<FilePath> = DashSet::new();
        let issues: Mutex<Vec<ScanIssue>> = Mutex::new(Vec::new());
        let (tx, rx) = mpsc::sync_channel::<FileRecord>(QUEUE_DEPTH);

        if let Some(progress) = self.progress() {
            progress.on_phase_start(PHASE_SCAN, 0);
        }

        let aliases = std::thread::scope(|s| {
            let stop = &stop;
            let check_stop = &check_stop;
            let finished = &finished;
            let discovered = &discovered;
            let issues = &issues;
            let walker = &walker;

            // Watchdog: turn caller cancellation or the deadline into the
            // internal stop flag polled by walker and hasher.
            s.spawn(move || {
                while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                    if check_stop() {
                        break;
                    }
                    std::thread::sleep(WATCH_INTERVAL);
                }
            });

            let producer = s.spawn(move || {
                let mut entries = walker.walk();
                let mut position = 0u64;
                for result in entries.by_ref() {
                    match result {
                        Ok(entry) => {
                            let record =
                                FileRecord::discovered(entry, Ordinal::new(generation, position));
                            position += 1;
                            let count = discovered.fetch_add(1, Ordering::SeqCst) + 1;
                            if let Some(progress) = self.progress() {
                                progress.on_discovered(count);
                            }
                            if tx.send(record).is_err() {
                                break;
                            }
                        }
                        Err(e) => issues
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(ScanIssue::from_scan(&e)),
                    }
                }
                log::debug!("Walk finished after {} files", position);
                entries.aliases().to_vec()
            });

            pool.install(|| {
                rx.into_iter().par_bridge().for_each(|mut record| {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let path = record.path.clone();
                    let known = self.unchanged_digest(index, &record);
                    let result = match known {
                        Some(digest) => Ok(digest),
                        None => hasher.hash_file(path.as_path()),
                    };
                    match result {
                        Ok(digest) => {
                            record.digest = Some(digest);
                            let size = record.size;
                            match index.insert_scanned(record) {
                                Ok(InsertOutcome::Superseded) => {
                                    log::debug!("Dropped scan result for resolved path {}", path);
                                }
                                Ok(outcome) => {
                                    log::trace!("Indexed {} ({:?})", path, outcome);
                                    let current = hashed.fetch_add(1, Ordering::SeqCst) + 1;
                                    if known.is_some() {
                                        reused.fetch_add(1, Ordering::SeqCst);
                                    } else {
                                        hashed_bytes.fetch_add(size, Ordering::SeqCst);
                                    }
                                    if let Some(progress) = self.progress() {
                                        progress.on_progress(current, &path.to_display_string());
                                        progress.on_item_completed(size);
                                    }
                                    observed.insert(path);
                                }
                                Err(e) => log::error!("Failed to index {}: {}", path, e),
                            }
                        }
                        Err(HashError::Interrupted(_)) => {
                            log::trace!("Hashing abandoned: {}", path);
                        }
                        Err(e) => {
                            log::warn!("Failed to hash {}: {}", path, e);
                            issues
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(ScanIssue::from_hash(&e));
                        }
                    }
                });
            });

            let aliases = producer.join().unwrap_or_else(|_| {
                log::error!("Walker thread panicked");
                stop.store(true, Ordering::SeqCst);
                Vec::new()
            });
            finished.store(true, Ordering::SeqCst);
            aliases
        });

        let reason = stop_reason.load(Ordering::SeqCst);
        let interrupted = stop.load(Ordering::SeqCst);
        let mut pruned = 0;

        let alias_paths: HashSet<FilePath> = aliases.iter().map(|a| a.path.clone()).collect();
        let symlinks = symlinks_by_target(aliases);
        for (target, links) in &symlinks {
            index.set_symlink_aliases(target.as_path(), links.clone());
        }

        if interrupted {
            log::info!("Scan pass {} interrupted; keeping existing records", generation);
        } else {
            if let Some(progress) = self.progress() {
                progress.on_phase_start(PHASE_PRUNE, 0);
            }
            for path in index.paths() {
                if observed.contains(&path) || alias_paths.contains(&path) {
                    if !symlinks.contains_key(&path) {
                        index.set_symlink_aliases(path.as_path(), Vec::new());
                    }
                    continue;
                }
                if index.resolved_this_pass(path.as_path()) {
                    continue;
                }
                if index.remove(path.as_path()).is_some() {
                    log::debug!("Pruned {}", path);
                    pruned += 1;
                }
            }
            index.clear_stale();
        }

        if let Some(progress) = self.progress() {
            progress.on_phase_end(PHASE_SCAN);
        }

        let groups = index.groups();
        let mut issues = issues.into_inner().unwrap_or_else(PoisonError::into_inner);
        issues.sort_by(|a, b| a.path.cmp(&b.path));

        let summary = ScanSummary {
            generation,
            total_files: discovered.load(Ordering::SeqCst),
            hashed_files: hashed.load(Ordering::SeqCst),
            reused_files: reused.load(Ordering::SeqCst),
            total_size: hashed_bytes.load(Ordering::SeqCst),
            duplicate_groups: groups.len(),
            duplicate_files: groups.iter().map(|g| g.len() - 1).sum(),
            reclaimable_space: groups.iter().map(super::DuplicateGroup::wasted_space).sum(),
            pruned,
            scan_duration: start_time.elapsed(),
            interrupted,
            timed_out: reason == STOP_TIMED_OUT,
            issues,
        };

        log::info!(
            "Scan pass {} complete: {} files hashed, {} groups, {} reclaimable, {} issues",
            generation,
            summary.hashed_files,
            summary.duplicate_groups,
            summary.reclaimable_display(),
            summary.issues.len()
        );

        Ok(summary)
    }
}

impl DuplicateFinder {
    /// Indexed digest of `record`'s path when size and mtime still match.
    fn unchanged_digest(&self, index: &DuplicateIndex, record: &FileRecord) -> Option<Digest> {
        if !self.config.skip_unchanged || index.is_stale(record.path.as_path()) {
            return None;
        }
        index
            .get(record.path.as_path())
            .filter(|known| known.size == record.size && known.modified == record.modified)
            .and_then(|known| known.digest)
    }
}

/// Group symbolic-link aliases by the path they resolve to.
fn symlinks_by_target(aliases: Vec<Alias>) -> HashMap<FilePath, Vec<FilePath>> {
    let mut by_target: HashMap<FilePath, Vec<FilePath>> = HashMap::new();
    for alias in aliases.into_iter().filter(|a| a.symbolic) {
        by_target.entry(alias.canonical).or_default().push(alias.path);
    }
    by_target
}

fn validate_root(root: &Path) -> Result<(), DedupError> {
    match std::fs::metadata(root) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(DedupError::NotADirectory(root.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DedupError::PathNotFound(root.to_path_buf()))
        }
        Err(e) => Err(DedupError::from_io(root, e)),
    }
}
