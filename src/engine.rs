//! The engine facade: one root, one index, scans and resolutions.
//!
//! A [`DedupEngine`] owns its [`DuplicateIndex`]; nothing is shared between
//! instances. All read and resolve methods take `&self`, so a front end can
//! resolve members from one thread while [`DedupEngine::rescan`] runs on
//! another. The index's per-bucket locks keep the two consistent.
//!
//! ```no_run
//! use dupedex::{DedupEngine, EngineConfig};
//! use dupedex::actions::ResolutionAction;
//!
//! let mut engine = DedupEngine::new("/data/photos", EngineConfig::default());
//! let summary = engine.scan().unwrap();
//! println!("{} groups", summary.duplicate_groups);
//!
//! for group in engine.groups() {
//!     for member in group.members.iter().skip(1) {
//!         engine
//!             .resolve(group.digest, member.path.as_path(), ResolutionAction::Delete)
//!             .unwrap();
//!     }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::actions::relocate;
use crate::actions::{Resolution, ResolutionAction, ResolutionRequest, Resolver};
use crate::config::EngineConfig;
use crate::duplicates::{
    DuplicateFinder, DuplicateGroup, DuplicateIndex, FolderIndex, ScanIssue, ScanSummary,
};
use crate::error::{DedupError, ResolveError};
use crate::progress::ProgressCallback;
use crate::scanner::{Digest, FilePath, Hasher};
use crate::signal::CancelToken;

/// Duplicate index and resolver for one directory tree.
pub struct DedupEngine {
    root: PathBuf,
    config: EngineConfig,
    index: DuplicateIndex,
    resolver: Resolver,
    cancel: CancelToken,
    progress: Option<Arc<dyn ProgressCallback>>,
    issues: Mutex<Vec<ScanIssue>>,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("records", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl DedupEngine {
    /// Create an engine for `root`. Nothing is read until a scan.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let hasher = Hasher::new().with_chunk_size(config.chunk_size);
        Self {
            root: root.into(),
            resolver: Resolver::new(config.resolution_policy()).with_hasher(hasher),
            config,
            index: DuplicateIndex::new(),
            cancel: CancelToken::new(),
            progress: None,
            issues: Mutex::new(Vec::new()),
        }
    }

    /// Share `token` with the caller (e.g. a Ctrl+C handler).
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report scan progress to `callback`.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Scanned root as given.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that stops a running scan.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &DuplicateIndex {
        &self.index
    }

    fn finder(&self) -> DuplicateFinder {
        let mut config = self.config.finder_config().with_cancel_token(self.cancel.clone());
        if let Some(progress) = &self.progress {
            config = config.with_progress_callback(Arc::clone(progress));
        }
        DuplicateFinder::new(config)
    }

    /// Fresh full pass: discards the current index first.
    ///
    /// An interrupted pass returns `Ok` with `interrupted` set.
    ///
    /// # Errors
    ///
    /// [`DedupError::PathNotFound`], [`DedupError::NotADirectory`] for a bad
    /// root, [`DedupError::WorkerPool`] if hashing cannot start.
    pub fn scan(&mut self) -> Result<ScanSummary, DedupError> {
        self.index = DuplicateIndex::new();
        self.rescan()
    }

    /// Incremental pass over the existing index.
    ///
    /// Files whose size and mtime match their record reuse the indexed
    /// digest unless `skip_unchanged` is off or the path is stale.
    /// Unchanged files keep their group numbers and link tags; changed files
    /// move buckets; vanished files are dropped (unless the pass is
    /// interrupted). A complete pass clears every stale flag.
    ///
    /// # Errors
    ///
    /// Same as [`DedupEngine::scan`].
    pub fn rescan(&self) -> Result<ScanSummary, DedupError> {
        let summary = self.finder().scan_into(&self.root, &self.index)?;
        *self.issues.lock().unwrap_or_else(PoisonError::into_inner) = summary.issues.clone();
        Ok(summary)
    }

    /// Current duplicate groups, numbered from 1.
    #[must_use]
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        self.index.groups()
    }

    /// Current groups plus the issues from the last pass.
    #[must_use]
    pub fn folder_index(&self) -> FolderIndex {
        let issues = self
            .issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        FolderIndex::new(self.groups(), issues)
    }

    /// Per-file problems from the last pass.
    #[must_use]
    pub fn issues(&self) -> Vec<ScanIssue> {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Paths whose index entry may no longer match the disk.
    #[must_use]
    pub fn stale_paths(&self) -> Vec<FilePath> {
        self.index.stale_paths()
    }

    /// Apply `action` to member `path` of group `digest`.
    ///
    /// # Errors
    ///
    /// A [`ResolveError`] carrying the digest, path, action and cause.
    pub fn resolve(
        &self,
        digest: Digest,
        path: &Path,
        action: ResolutionAction,
    ) -> Result<Resolution, ResolveError> {
        self.resolver.resolve(&self.index, digest, path, action)
    }

    /// [`DedupEngine::resolve`] taking the hex digest used at the boundary.
    ///
    /// # Errors
    ///
    /// [`DedupError::InvalidDigest`] inside the [`ResolveError`] for a
    /// malformed digest; otherwise as [`DedupEngine::resolve`].
    pub fn resolve_str(
        &self,
        digest_hex: &str,
        path: impl AsRef<Path>,
        action: ResolutionAction,
    ) -> Result<Resolution, ResolveError> {
        let path = path.as_ref();
        let digest = Digest::from_hex(digest_hex)
            .ok_or_else(|| ResolveError::invalid_digest(digest_hex, path, action.kind()))?;
        self.resolve(digest, path, action)
    }

    /// Apply requests in order, one result per request.
    ///
    /// A failed request does not stop the rest; later requests see the
    /// index as earlier ones left it.
    pub fn resolve_batch(
        &self,
        requests: Vec<ResolutionRequest>,
    ) -> Vec<Result<Resolution, ResolveError>> {
        log::debug!("Resolving batch of {} requests", requests.len());
        requests
            .into_iter()
            .map(|req| self.resolve_str(&req.digest, &req.path, req.action))
            .collect()
    }

    /// Keep the first member of every group and move the others into
    /// `folder`, one result per moved member.
    ///
    /// `folder` is created if needed. Names already taken there get a
    /// counter (`a(1).txt`). Members are moved one at a time through
    /// [`DedupEngine::resolve`], so every guard applies and a refused
    /// member does not stop the rest.
    ///
    /// # Errors
    ///
    /// [`DedupError`] if `folder` cannot be created.
    pub fn move_duplicates(
        &self,
        folder: &Path,
    ) -> Result<Vec<Result<Resolution, ResolveError>>, DedupError> {
        fs::create_dir_all(folder).map_err(|e| DedupError::from_io(folder, e))?;
        let groups = self.groups();
        log::info!("Moving duplicates of {} groups into {}", groups.len(), folder.display());

        let mut results = Vec::new();
        for group in &groups {
            for member in group.members.iter().skip(1) {
                let path = member.path.as_path();
                let Some(name) = path.file_name() else {
                    continue;
                };
                let destination = relocate::unique_destination(folder, name);
                results.push(self.resolve(group.digest, path, ResolutionAction::Move { destination }));
            }
        }
        Ok(results)
    }

    /// Delete every member of a group. Disabled unless configured.
    ///
    /// # Errors
    ///
    /// See [`Resolver::delete_group`].
    pub fn delete_group(&self, digest: Digest) -> Result<Vec<Resolution>, ResolveError> {
        self.resolver.delete_group(&self.index, digest)
    }
}
