//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - The concurrent digest → records index ([`index`])
//! - Numbered duplicate groups and the boundary mapping ([`groups`])
//! - The walk → hash → index scan pipeline ([`finder`])

pub mod finder;
pub mod groups;
pub mod index;

pub use finder::{
    DuplicateFinder, FinderConfig, IssueKind, ScanIssue, ScanSummary, DEFAULT_IO_THREADS,
};
pub use groups::{snapshot, DuplicateGroup, DuplicateMap, FolderIndex, GroupMember};
pub use index::{
    BucketEditor, DuplicateIndex, FileRecord, IndexError, InsertOutcome, LinkInfo, LinkKind,
    Ordinal,
};
