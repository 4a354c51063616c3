//! Duplicate groups: numbered views over index buckets.
//!
//! # Overview
//!
//! A [`DuplicateGroup`] is an immutable copy of one bucket with two or more
//! members, taken under that bucket's lock. Groups are ordered by the
//! discovery ordinal of the first file ever seen with that digest and
//! numbered from 1 in that order, so the same tree scanned twice yields
//! the same numbering no matter how hash jobs interleave.
//!
//! [`FolderIndex`] is the boundary form of a whole scan: digest hex →
//! member path strings, plus the per-file issues the scan collected.
//!
//! # Example
//!
//! ```
//! use dupedex::duplicates::{DuplicateIndex, FileRecord, Ordinal};
//! use dupedex::scanner::{Digest, FileEntry};
//! use std::path::PathBuf;
//! use std::time::SystemTime;
//!
//! let index = DuplicateIndex::new();
//! for (i, (name, body)) in [("/d/a", "x"), ("/d/b", "y"), ("/d/c", "x")].iter().enumerate() {
//!     let entry = FileEntry::new(PathBuf::from(name), 1, SystemTime::now());
//!     let record = FileRecord::discovered(entry, Ordinal::new(1, i as u64))
//!         .with_digest(Digest::of_bytes(body.as_bytes()));
//!     index.insert(record).unwrap();
//! }
//!
//! let groups = index.groups();
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].group_number, 1);
//! assert_eq!(groups[0].len(), 2);
//! ```

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::finder::ScanIssue;
use super::index::{DuplicateIndex, FileRecord, LinkInfo};
use crate::scanner::{Digest, FilePath};

/// One member of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    /// Absolute path
    pub path: FilePath,
    /// Size in bytes at scan time
    pub size: u64,
    /// Present when the member was replaced by a link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkInfo>,
}

impl From<&FileRecord> for GroupMember {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            link: record.link.clone(),
        }
    }
}

/// A set of files with identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// 1-based position in discovery order
    pub group_number: usize,
    /// Shared content digest
    pub digest: Digest,
    /// Size of each file in bytes
    pub size: u64,
    /// Members in discovery order
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a snapshot group (two or more members).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &FilePath> {
        self.members.iter().map(|m| &m.path)
    }

    /// Whether `path` is a member.
    #[must_use]
    pub fn contains(&self, path: &FilePath) -> bool {
        self.members.iter().any(|m| &m.path == path)
    }

    /// Members that still hold their own copy of the content.
    #[must_use]
    pub fn unlinked_count(&self) -> usize {
        self.members.iter().filter(|m| m.link.is_none()).count()
    }

    /// Bytes that resolving every redundant copy would free.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        let copies = self.unlinked_count().saturating_sub(1) as u64;
        self.size.saturating_mul(copies)
    }

    /// Member paths as boundary strings.
    #[must_use]
    pub fn path_strings(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.path.to_display_string())
            .collect()
    }
}

/// Build the numbered group list from the index's current state.
///
/// Buckets with fewer than two members are not groups. Each bucket is
/// copied under its own lock, so a group is internally consistent even
/// while other buckets are being modified.
#[must_use]
pub fn snapshot(index: &DuplicateIndex) -> Vec<DuplicateGroup> {
    let mut views: Vec<_> = index
        .bucket_views()
        .into_iter()
        .filter(|v| v.records.len() > 1)
        .collect();
    views.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.digest.cmp(&b.digest)));

    views
        .into_iter()
        .enumerate()
        .map(|(i, view)| DuplicateGroup {
            group_number: i + 1,
            digest: view.digest,
            size: view.records.first().map_or(0, |r| r.size),
            members: view.records.iter().map(GroupMember::from).collect(),
        })
        .collect()
}

/// Ordered digest → paths mapping; serializes as a JSON object whose keys
/// follow group numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateMap(Vec<DuplicateGroup>);

impl DuplicateMap {
    /// Groups in numbering order.
    #[must_use]
    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.0
    }
}

impl Serialize for DuplicateMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for group in &self.0 {
            map.serialize_entry(&group.digest.to_hex(), &group.path_strings())?;
        }
        map.end()
    }
}

/// Result of indexing a folder: the duplicate mapping plus per-file issues.
///
/// Serializes as the bare digest hex → paths object; `errors` is carried
/// beside it for callers that want it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FolderIndex {
    /// Digest hex → member paths, in group order
    pub duplicates: DuplicateMap,
    /// Files that could not be read or hashed
    #[serde(skip)]
    pub errors: Vec<ScanIssue>,
}

impl FolderIndex {
    /// Assemble from a group snapshot and collected issues.
    #[must_use]
    pub fn new(groups: Vec<DuplicateGroup>, errors: Vec<ScanIssue>) -> Self {
        Self {
            duplicates: DuplicateMap(groups),
            errors,
        }
    }

    /// Groups in numbering order.
    #[must_use]
    pub fn groups(&self) -> &[DuplicateGroup] {
        self.duplicates.groups()
    }

    /// Number of duplicate groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups().len()
    }

    /// Whether no duplicates were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups().is_empty()
    }

    /// Paths for one digest hex string.
    #[must_use]
    pub fn get(&self, digest_hex: &str) -> Option<Vec<String>> {
        let digest = Digest::from_hex(digest_hex)?;
        self.groups()
            .iter()
            .find(|g| g.digest == digest)
            .map(DuplicateGroup::path_strings)
    }

    /// Plain digest hex → paths map (keys sorted by digest).
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.groups()
            .iter()
            .map(|g| (g.digest.to_hex(), g.path_strings()))
            .collect()
    }
}
