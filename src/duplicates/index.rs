//! The duplicate index: digest → bucket of file records.
//!
//! # Overview
//!
//! [`DuplicateIndex`] is the single source of truth for one engine instance.
//! Buckets live in a sharded [`DashMap`], each behind its own mutex, so
//! concurrent hash workers inserting different digests never contend on a
//! global lock while inserts into one bucket are serialized.
//!
//! Records are ordered inside a bucket by their discovery [`Ordinal`], and a
//! bucket remembers the smallest ordinal ever inserted into it. Both come
//! from the walker's deterministic order, never from hash completion order,
//! which is what keeps group numbering stable across runs.
//!
//! # Locking
//!
//! - A bucket's mutex is never acquired while a map shard guard is held;
//!   handles are cloned out of the map first.
//! - The path → digest location map is only written while the owning
//!   bucket's mutex is held.
//! - A bucket emptied by a removal is marked retired and unlinked from the
//!   map before its mutex is released; inserters that raced onto a retired
//!   bucket retry against a fresh one.
//! - Paths removed, re-keyed or re-tagged through a [`BucketEditor`] are
//!   remembered until the next pass begins. Scan inserts for those paths
//!   ([`DuplicateIndex::insert_scanned`]) are dropped under the bucket
//!   lock, so a hash that started before a resolution cannot bring the
//!   old state back.
//!
//! # Example
//!
//! ```
//! use dupedex::duplicates::{DuplicateIndex, FileRecord, Ordinal};
//! use dupedex::scanner::{Digest, FileEntry};
//! use std::time::SystemTime;
//!
//! let index = DuplicateIndex::new();
//! let digest = Digest::of_bytes(b"hello");
//! for (i, name) in ["/data/a.txt", "/data/b.txt"].iter().enumerate() {
//!     let entry = FileEntry::new(std::path::PathBuf::from(name), 5, SystemTime::now());
//!     let record = FileRecord::discovered(entry, Ordinal::new(1, i as u64)).with_digest(digest);
//!     index.insert(record).unwrap();
//! }
//! assert_eq!(index.groups().len(), 1);
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use super::groups::{self, DuplicateGroup};
use crate::scanner::{Digest, FileEntry, FilePath};

/// Deterministic discovery position of a record.
///
/// `generation` counts scan passes over one index; `position` is the
/// walker's output position within that pass. Ordinals compare
/// lexicographically, so everything found by an earlier pass sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Ordinal {
    /// Scan pass number (1-based for scanned records)
    pub generation: u32,
    /// Position within the pass
    pub position: u64,
}

impl Ordinal {
    /// Create an ordinal.
    #[must_use]
    pub const fn new(generation: u32, position: u64) -> Self {
        Self {
            generation,
            position,
        }
    }
}

/// Kind of link a resolved member was replaced with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Hard link: the path shares the target's storage.
    #[default]
    Hard,
    /// Symbolic link: the path only refers to the target by name.
    Symbolic,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hard => f.write_str("hard"),
            Self::Symbolic => f.write_str("symbolic"),
        }
    }
}

/// Link tag carried by a record after a `Link` resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    /// How the path was linked
    pub kind: LinkKind,
    /// Member the path now refers to
    pub target: FilePath,
}

/// One scanned file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute, normalized path; unique within an index
    pub path: FilePath,
    /// Size in bytes at scan time
    pub size: u64,
    /// Modification time at scan time
    pub modified: SystemTime,
    /// Content digest; `None` until hashed
    pub digest: Option<Digest>,
    /// Discovery position
    pub ordinal: Ordinal,
    /// Set when the path was replaced by a link to another member
    pub link: Option<LinkInfo>,
    /// Symbolic links found by the walk that resolve to this path
    pub symlink_aliases: Vec<FilePath>,
}

impl FileRecord {
    /// Record for a freshly discovered file, not yet hashed.
    #[must_use]
    pub fn discovered(entry: FileEntry, ordinal: Ordinal) -> Self {
        Self {
            path: entry.path,
            size: entry.size,
            modified: entry.modified,
            digest: None,
            ordinal,
            link: None,
            symlink_aliases: Vec::new(),
        }
    }

    /// Attach the computed digest.
    #[must_use]
    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Whether this record is a symbolic link to another member.
    #[must_use]
    pub fn is_symbolic_link(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.kind == LinkKind::Symbolic)
    }
}

/// Errors raised by index operations.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// Only hashed records can be indexed.
    #[error("record for {} has no digest", .0.display())]
    MissingDigest(PathBuf),

    /// The path is not a member of the bucket being edited.
    #[error("{} is not indexed under {digest}", .path.display())]
    NotInBucket {
        /// Bucket digest
        digest: Digest,
        /// Path looked up
        path: PathBuf,
    },

    /// The destination path is already indexed.
    #[error("{} is already indexed", .0.display())]
    AlreadyIndexed(PathBuf),
}

/// What [`DuplicateIndex::insert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The path was not indexed before.
    Added,
    /// The path was already indexed with the same digest and was replaced
    /// in place, keeping its ordinal.
    Replaced,
    /// The path was indexed under a different digest and moved buckets.
    Rehomed {
        /// Digest the path was previously indexed under
        from: Digest,
    },
    /// A resolution changed the path during the current pass; the scanned
    /// record was dropped.
    Superseded,
}

enum Attached {
    Added,
    Replaced,
    Superseded,
}

/// Per-digest record collection.
#[derive(Debug)]
struct Bucket {
    digest: Digest,
    /// Smallest ordinal ever inserted; drives group numbering
    first_seen: Ordinal,
    /// Records sorted by ordinal
    records: Vec<FileRecord>,
    /// Set once the bucket was emptied and unlinked from the map
    retired: bool,
}

impl Bucket {
    fn new(digest: Digest, first_seen: Ordinal) -> Self {
        Self {
            digest,
            first_seen,
            records: Vec::new(),
            retired: false,
        }
    }

    fn position(&self, path: &FilePath) -> Option<usize> {
        self.records.iter().position(|r| &r.path == path)
    }

    fn insert_sorted(&mut self, record: FileRecord) {
        self.first_seen = self.first_seen.min(record.ordinal);
        let at = self
            .records
            .partition_point(|r| r.ordinal <= record.ordinal);
        self.records.insert(at, record);
    }
}

/// Read-only copy of one bucket, taken under its lock.
#[derive(Debug, Clone)]
pub(crate) struct BucketView {
    pub digest: Digest,
    pub first_seen: Ordinal,
    pub records: Vec<FileRecord>,
}

type BucketHandle = Arc<Mutex<Bucket>>;

fn lock(handle: &BucketHandle) -> MutexGuard<'_, Bucket> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent digest → records index.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    buckets: DashMap<Digest, BucketHandle>,
    locations: DashMap<FilePath, Digest>,
    stale: DashSet<FilePath>,
    /// Paths changed by resolutions since the current pass began
    resolved: DashSet<FilePath>,
    generation: AtomicU32,
}

impl DuplicateIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new scan pass and return its generation number.
    ///
    /// Forgets which paths earlier resolutions touched.
    pub fn begin_pass(&self) -> u32 {
        self.resolved.clear();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn handle(&self, digest: &Digest) -> Option<BucketHandle> {
        self.buckets.get(digest).map(|b| Arc::clone(b.value()))
    }

    fn handle_or_create(&self, digest: Digest, first_seen: Ordinal) -> BucketHandle {
        Arc::clone(
            self.buckets
                .entry(digest)
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(digest, first_seen))))
                .value(),
        )
    }

    /// Unlink an emptied bucket. Must be called with its lock held.
    fn retire(&self, handle: &BucketHandle, bucket: &mut Bucket) {
        bucket.retired = true;
        self.buckets
            .remove_if(&bucket.digest, |_, current| Arc::ptr_eq(current, handle));
        log::trace!("Bucket {} emptied and dropped", bucket.digest.short());
    }

    /// Insert a hashed record.
    ///
    /// Idempotent on path: an unchanged digest replaces the record in
    /// place and keeps its original ordinal and link tag; a changed digest
    /// moves the record to the new bucket, dropping the old bucket if it
    /// empties.
    ///
    /// # Errors
    ///
    /// [`IndexError::MissingDigest`] if the record was never hashed.
    pub fn insert(&self, record: FileRecord) -> Result<InsertOutcome, IndexError> {
        self.upsert(record, false)
    }

    /// Insert a record produced by a scan pass.
    ///
    /// Same as [`DuplicateIndex::insert`], except that the record is
    /// dropped with [`InsertOutcome::Superseded`] when a resolution
    /// changed its path since the pass began.
    ///
    /// # Errors
    ///
    /// [`IndexError::MissingDigest`] if the record was never hashed.
    pub fn insert_scanned(&self, record: FileRecord) -> Result<InsertOutcome, IndexError> {
        self.upsert(record, true)
    }

    fn upsert(&self, record: FileRecord, scanned: bool) -> Result<InsertOutcome, IndexError> {
        let digest = record
            .digest
            .ok_or_else(|| IndexError::MissingDigest(record.path.as_path().to_path_buf()))?;
        if scanned && self.resolved.contains(&record.path) {
            return Ok(InsertOutcome::Superseded);
        }

        let previous = self.locations.get(&record.path).map(|d| *d.value());
        let rehomed = match previous {
            Some(old) if old != digest => {
                self.detach(&old, &record.path, scanned);
                Some(old)
            }
            _ => None,
        };

        Ok(match (rehomed, self.attach(digest, record, scanned)) {
            (_, Attached::Superseded) => InsertOutcome::Superseded,
            (Some(from), _) => InsertOutcome::Rehomed { from },
            (None, Attached::Replaced) => InsertOutcome::Replaced,
            (None, Attached::Added) => InsertOutcome::Added,
        })
    }

    /// Add or replace `record` in its bucket.
    fn attach(&self, digest: Digest, mut record: FileRecord, scanned: bool) -> Attached {
        loop {
            let handle = self.handle_or_create(digest, record.ordinal);
            let mut bucket = lock(&handle);
            if bucket.retired {
                continue;
            }
            if scanned && self.resolved.contains(&record.path) {
                if bucket.records.is_empty() {
                    self.retire(&handle, &mut bucket);
                }
                return Attached::Superseded;
            }

            self.locations.insert(record.path.clone(), digest);
            if let Some(i) = bucket.position(&record.path) {
                let existing = &bucket.records[i];
                record.ordinal = existing.ordinal;
                if record.link.is_none() {
                    record.link = existing.link.clone();
                }
                if record.symlink_aliases.is_empty() {
                    record.symlink_aliases = existing.symlink_aliases.clone();
                }
                bucket.records[i] = record;
                return Attached::Replaced;
            }
            bucket.insert_sorted(record);
            return Attached::Added;
        }
    }

    /// Remove `path` from the bucket for `digest`, if present.
    fn detach(&self, digest: &Digest, path: &FilePath, scanned: bool) -> Option<FileRecord> {
        let handle = self.handle(digest)?;
        let mut bucket = lock(&handle);
        if bucket.retired || (scanned && self.resolved.contains(path)) {
            return None;
        }
        let removed = bucket.position(path).map(|i| bucket.records.remove(i));
        self.locations.remove_if(path, |_, d| d == digest);
        if bucket.records.is_empty() {
            self.retire(&handle, &mut bucket);
        }
        removed
    }

    /// Remove the record for `path`.
    ///
    /// A bucket left with one member stops being a duplicate group; an
    /// emptied bucket is dropped.
    pub fn remove(&self, path: &Path) -> Option<FileRecord> {
        let key = FilePath::new(path);
        let digest = self.locations.get(&key).map(|d| *d.value())?;
        let removed = self.detach(&digest, &key, false);
        self.stale.remove(&key);
        removed
    }

    /// Look up the record for `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<FileRecord> {
        let key = FilePath::new(path);
        let digest = self.locations.get(&key).map(|d| *d.value())?;
        let handle = self.handle(&digest)?;
        let bucket = lock(&handle);
        bucket
            .position(&key)
            .map(|i| bucket.records[i].clone())
    }

    /// Digest `path` is indexed under.
    #[must_use]
    pub fn digest_of(&self, path: &Path) -> Option<Digest> {
        self.locations.get(&FilePath::new(path)).map(|d| *d.value())
    }

    /// Whether `path` is indexed.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.locations.contains_key(&FilePath::new(path))
    }

    /// Members of one bucket in ordinal order (empty if unknown).
    #[must_use]
    pub fn bucket(&self, digest: &Digest) -> Vec<FileRecord> {
        self.handle(digest)
            .map(|handle| lock(&handle).records.clone())
            .unwrap_or_default()
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether the index holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Number of distinct digests (singleton buckets included).
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// All indexed paths, unordered.
    #[must_use]
    pub fn paths(&self) -> Vec<FilePath> {
        self.locations.iter().map(|e| e.key().clone()).collect()
    }

    /// Current duplicate groups, numbered. See [`groups::snapshot`].
    #[must_use]
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        groups::snapshot(self)
    }

    /// Copies of every bucket, each taken under its own lock.
    pub(crate) fn bucket_views(&self) -> Vec<BucketView> {
        let handles: Vec<BucketHandle> =
            self.buckets.iter().map(|b| Arc::clone(b.value())).collect();
        handles
            .iter()
            .filter_map(|handle| {
                let bucket = lock(handle);
                (!bucket.retired).then(|| BucketView {
                    digest: bucket.digest,
                    first_seen: bucket.first_seen,
                    records: bucket.records.clone(),
                })
            })
            .collect()
    }

    /// Flag a record whose disk state is no longer known to match.
    pub fn mark_stale(&self, path: &Path) {
        log::warn!("Marking {} stale until the next rescan", path.display());
        self.stale.insert(FilePath::new(path));
    }

    /// Paths flagged stale since the last complete scan.
    #[must_use]
    pub fn stale_paths(&self) -> Vec<FilePath> {
        let mut paths: Vec<FilePath> = self.stale.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Whether `path` is flagged stale.
    #[must_use]
    pub fn is_stale(&self, path: &Path) -> bool {
        self.stale.contains(&FilePath::new(path))
    }

    /// Whether a resolution changed `path` since the current pass began.
    #[must_use]
    pub fn resolved_this_pass(&self, path: &Path) -> bool {
        self.resolved.contains(&FilePath::new(path))
    }

    /// Replace the symbolic links recorded as resolving to `path`.
    ///
    /// Returns `false` if `path` is not indexed.
    pub fn set_symlink_aliases(&self, path: &Path, aliases: Vec<FilePath>) -> bool {
        let key = FilePath::new(path);
        let Some(digest) = self.locations.get(&key).map(|d| *d.value()) else {
            return false;
        };
        let Some(handle) = self.handle(&digest) else {
            return false;
        };
        let mut bucket = lock(&handle);
        match bucket.position(&key) {
            Some(i) => {
                bucket.records[i].symlink_aliases = aliases;
                true
            }
            None => false,
        }
    }

    /// Clear all stale flags (after a complete rescan).
    pub fn clear_stale(&self) {
        self.stale.clear();
    }

    /// Run `edit` with exclusive access to one bucket.
    ///
    /// The bucket stays locked for the whole closure, so concurrent
    /// inserts and edits touching the same digest wait; other digests are
    /// unaffected. Returns `None` if no bucket exists for `digest`.
    pub fn with_bucket<R>(
        &self,
        digest: &Digest,
        edit: impl FnOnce(&mut BucketEditor<'_>) -> R,
    ) -> Option<R> {
        let handle = self.handle(digest)?;
        let mut bucket = lock(&handle);
        if bucket.retired {
            return None;
        }

        let result = {
            let mut editor = BucketEditor {
                index: self,
                bucket: &mut bucket,
            };
            edit(&mut editor)
        };

        if bucket.records.is_empty() {
            self.retire(&handle, &mut bucket);
        }
        Some(result)
    }
}

/// Exclusive view of one locked bucket, handed out by
/// [`DuplicateIndex::with_bucket`].
pub struct BucketEditor<'a> {
    index: &'a DuplicateIndex,
    bucket: &'a mut Bucket,
}

impl BucketEditor<'_> {
    /// Digest of the locked bucket.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.bucket.digest
    }

    /// Members in ordinal order.
    #[must_use]
    pub fn members(&self) -> &[FileRecord] {
        &self.bucket.records
    }

    /// Record for `path`, if it belongs to this bucket.
    #[must_use]
    pub fn get(&self, path: &FilePath) -> Option<&FileRecord> {
        self.bucket.position(path).map(|i| &self.bucket.records[i])
    }

    /// Whether `path` is indexed anywhere (any bucket).
    #[must_use]
    pub fn is_indexed(&self, path: &FilePath) -> bool {
        self.index.locations.contains_key(path)
    }

    fn require(&self, path: &FilePath) -> Result<usize, IndexError> {
        self.bucket
            .position(path)
            .ok_or_else(|| IndexError::NotInBucket {
                digest: self.bucket.digest,
                path: path.as_path().to_path_buf(),
            })
    }

    /// Remove a member.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotInBucket`] if `path` is not a member.
    pub fn remove(&mut self, path: &FilePath) -> Result<FileRecord, IndexError> {
        let i = self.require(path)?;
        let record = self.bucket.records.remove(i);
        let digest = self.bucket.digest;
        self.index.locations.remove_if(path, |_, d| *d == digest);
        self.index.stale.remove(path);
        self.index.resolved.insert(path.clone());
        Ok(record)
    }

    /// Re-key a member to a new path, keeping digest, ordinal and link tag.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotInBucket`] if `from` is not a member,
    /// [`IndexError::AlreadyIndexed`] if `to` is already indexed.
    pub fn relocate(&mut self, from: &FilePath, to: FilePath) -> Result<(), IndexError> {
        let i = self.require(from)?;
        if self.index.locations.contains_key(&to) {
            return Err(IndexError::AlreadyIndexed(to.into_path_buf()));
        }
        let digest = self.bucket.digest;
        self.index.locations.remove_if(from, |_, d| *d == digest);
        self.index.stale.remove(from);
        self.index.resolved.insert(from.clone());
        self.index.resolved.insert(to.clone());
        self.index.locations.insert(to.clone(), digest);
        self.bucket.records[i].path = to;
        Ok(())
    }

    /// Tag a member as a link to another member.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotInBucket`] if `path` is not a member.
    pub fn tag_link(&mut self, path: &FilePath, link: LinkInfo) -> Result<(), IndexError> {
        let i = self.require(path)?;
        self.bucket.records[i].link = Some(link);
        self.index.resolved.insert(path.clone());
        Ok(())
    }

    /// Update a member's recorded size and mtime after its file changed
    /// identity but not content (moved, or hard-linked to a sibling).
    ///
    /// # Errors
    ///
    /// [`IndexError::NotInBucket`] if `path` is not a member.
    pub fn refresh(&mut self, path: &FilePath, size: u64, modified: SystemTime) -> Result<(), IndexError> {
        let i = self.require(path)?;
        let record = &mut self.bucket.records[i];
        record.size = size;
        record.modified = modified;
        self.index.resolved.insert(path.clone());
        Ok(())
    }
}
