//! Resolution actions: move, link and delete.
//!
//! This module provides:
//! - Guarded resolution of one duplicate-group member ([`Resolver`])
//! - Safe moves that never overwrite ([`relocate`])
//! - Replacing a duplicate with a hard or symbolic link ([`link`])
//! - Permanent or trash deletion with TOCTOU checks ([`delete`])
//!
//! ```no_run
//! use dupedex::actions::{ResolutionAction, Resolver};
//! use dupedex::duplicates::{DuplicateFinder, DuplicateIndex, FinderConfig};
//! use std::path::Path;
//!
//! let index = DuplicateIndex::new();
//! DuplicateFinder::new(FinderConfig::default())
//!     .scan_into(Path::new("/data"), &index)
//!     .unwrap();
//! let group = &index.groups()[0];
//! let resolver = Resolver::default();
//! resolver
//!     .resolve(&index, group.digest, group.members[1].path.as_path(), ResolutionAction::Delete)
//!     .unwrap();
//! ```

use std::path::PathBuf;

use serde::Serialize;

use crate::duplicates::{LinkInfo, LinkKind};
use crate::scanner::{Digest, FilePath};

pub mod delete;
pub mod link;
pub mod relocate;
pub mod resolve;

pub use delete::{DeleteMode, FileSnapshot};
pub use link::LinkOutcome;
pub use relocate::MoveMethod;
pub use resolve::{ResolutionPolicy, Resolver};

/// The three resolution verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Relocate a member
    Move,
    /// Replace a member with a link
    Link,
    /// Remove a member
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Move => "move",
            Self::Link => "link",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// An action requested on one group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Move the member to `destination`. Never overwrites.
    Move {
        /// New location; relative paths resolve against the working directory
        destination: PathBuf,
    },
    /// Replace the member with a link to `target`, another member of the
    /// same group.
    Link {
        /// Member the link will point at
        target: PathBuf,
        /// Requested link kind
        kind: LinkKind,
    },
    /// Delete the member.
    Delete,
}

impl ResolutionAction {
    /// Verb of this action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Link { .. } => ActionKind::Link,
            Self::Delete => ActionKind::Delete,
        }
    }
}

/// A successfully applied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Verb that was applied
    pub action: ActionKind,
    /// Group the member belonged to
    pub digest: Digest,
    /// Member path before the action
    pub path: FilePath,
    /// New path after a move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<FilePath>,
    /// Link tag after a link; reports a symbolic fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkInfo>,
    /// Bytes of storage released
    pub freed_bytes: u64,
}

/// One entry in a batch of resolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Group digest as hex
    pub digest: String,
    /// Member path
    pub path: PathBuf,
    /// Action to apply
    pub action: ResolutionAction,
}

impl ResolutionRequest {
    /// Build a request.
    #[must_use]
    pub fn new(digest: impl Into<String>, path: impl Into<PathBuf>, action: ResolutionAction) -> Self {
        Self {
            digest: digest.into(),
            path: path.into(),
            action,
        }
    }
}
