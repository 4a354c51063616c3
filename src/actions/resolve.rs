//! Applying move / link / delete to one member of a duplicate group.
//!
//! # Guarantees
//!
//! - Each action holds its bucket's lock from validation to index update,
//!   so nothing else touching the same digest interleaves with it.
//! - Guards run before the filesystem is touched. A rejected or failed
//!   filesystem step leaves both disk and index as they were.
//! - If the disk changed but the index cannot follow, the path is flagged
//!   stale and the action fails with [`InvariantViolation::IndexDesync`].
//! - A single-member `Delete` never removes the last independent copy.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use super::delete::{self, DeleteMode};
use super::link;
use super::relocate;
use super::{ActionKind, Resolution, ResolutionAction};
use crate::duplicates::{BucketEditor, DuplicateIndex, IndexError, LinkInfo, LinkKind};
use crate::error::{DedupError, InvariantViolation, ResolveError};
use crate::scanner::{Digest, FilePath, Hasher};

/// Policy knobs for resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPolicy {
    /// Substitute a symbolic link when a hard link would cross filesystems
    pub allow_symlink_fallback: bool,
    /// Re-hash cross-filesystem move copies before removing the source
    pub verify_cross_volume_moves: bool,
    /// Permanent delete or system trash
    pub delete_mode: DeleteMode,
    /// Enable [`Resolver::delete_group`]
    pub allow_group_delete: bool,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            allow_symlink_fallback: false,
            verify_cross_volume_moves: true,
            delete_mode: DeleteMode::Permanent,
            allow_group_delete: false,
        }
    }
}

/// Executes resolution actions against one index.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    policy: ResolutionPolicy,
    hasher: Hasher,
}

impl Resolver {
    /// Create a resolver with the given policy.
    #[must_use]
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self {
            policy,
            hasher: Hasher::new(),
        }
    }

    /// Use `hasher` for move verification.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Apply `action` to member `path` of group `digest`.
    ///
    /// # Errors
    ///
    /// Every failure is returned as a [`ResolveError`] naming the digest,
    /// path and action. See [`DedupError`] for the kinds.
    pub fn resolve(
        &self,
        index: &DuplicateIndex,
        digest: Digest,
        path: &Path,
        action: ResolutionAction,
    ) -> Result<Resolution, ResolveError> {
        let kind = action.kind();
        let member = FilePath::new(path);
        log::debug!("Resolving {} of {} in group {}", kind, member, digest.short());

        let result = index
            .with_bucket(&digest, |bucket| {
                if bucket.get(&member).is_none() {
                    return Err(unknown_member(digest, &member));
                }
                match action {
                    ResolutionAction::Move { destination } => {
                        self.apply_move(index, bucket, &member, &destination)
                    }
                    ResolutionAction::Link { target, kind } => {
                        self.apply_link(index, bucket, &member, &target, kind)
                    }
                    ResolutionAction::Delete => self.apply_delete(index, bucket, &member),
                }
            })
            .unwrap_or_else(|| Err(unknown_member(digest, &member)));

        result.map_err(|error| {
            log::warn!("{} of {} failed: {}", kind, member, error);
            ResolveError::new(digest, member.as_path(), kind, error)
        })
    }

    /// Delete every member of a group, symbolic links first.
    ///
    /// Refused with [`InvariantViolation::GroupDeleteDisabled`] unless the
    /// policy enables it. Stops at the first failure; members already
    /// deleted stay deleted and are gone from the index.
    ///
    /// # Errors
    ///
    /// A [`ResolveError`] for the member that failed.
    pub fn delete_group(
        &self,
        index: &DuplicateIndex,
        digest: Digest,
    ) -> Result<Vec<Resolution>, ResolveError> {
        let fail = |path: &Path, error: DedupError| {
            ResolveError::new(digest, path, ActionKind::Delete, error)
        };
        if !self.policy.allow_group_delete {
            return Err(fail(
                Path::new(""),
                InvariantViolation::GroupDeleteDisabled(digest).into(),
            ));
        }

        index
            .with_bucket(&digest, |bucket| {
                let mut order: Vec<_> = bucket.members().to_vec();
                order.sort_by_key(|r| !r.is_symbolic_link());

                let mut done = Vec::with_capacity(order.len());
                for record in order {
                    delete::verify_unchanged(&record).map_err(|e| fail(record.path.as_path(), e))?;
                    let freed = delete::reclaimable_bytes(record.path.as_path(), record.size);
                    delete::remove_file(record.path.as_path(), self.policy.delete_mode)
                        .map_err(|e| fail(record.path.as_path(), e))?;
                    if let Err(e) = bucket.remove(&record.path) {
                        return Err(fail(
                            record.path.as_path(),
                            desync(index, ActionKind::Delete, &record.path, &e),
                        ));
                    }
                    done.push(Resolution {
                        action: ActionKind::Delete,
                        digest,
                        path: record.path.clone(),
                        new_path: None,
                        link: None,
                        freed_bytes: freed,
                    });
                }
                log::info!("Deleted all {} members of group {}", done.len(), digest.short());
                Ok(done)
            })
            .unwrap_or_else(|| {
                Err(fail(
                    Path::new(""),
                    DedupError::UnknownMember {
                        digest,
                        path: Default::default(),
                    },
                ))
            })
    }

    fn apply_move(
        &self,
        index: &DuplicateIndex,
        bucket: &mut BucketEditor<'_>,
        member: &FilePath,
        destination: &Path,
    ) -> Result<Resolution, DedupError> {
        let digest = bucket.digest();
        let dest = FilePath::new(destination);
        if bucket.is_indexed(&dest) {
            return Err(DedupError::Conflict(dest.into_path_buf()));
        }
        relocate::ensure_vacant(dest.as_path())?;
        refuse_if_link_target(bucket, member)?;

        if let Some(record) = bucket.get(member) {
            delete::verify_unchanged(record)?;
        }

        let verify = self
            .policy
            .verify_cross_volume_moves
            .then_some((&self.hasher, digest));
        let method = relocate::move_file(member.as_path(), dest.as_path(), verify)?;

        let update = bucket.relocate(member, dest.clone()).and_then(|()| {
            match fs::metadata(dest.as_path()) {
                Ok(meta) => bucket.refresh(&dest, meta.len(), modified(&meta)),
                Err(_) => Ok(()),
            }
        });
        if let Err(e) = update {
            index.mark_stale(dest.as_path());
            return Err(desync(index, ActionKind::Move, member, &e));
        }

        log::info!("Moved {} -> {} ({:?})", member, dest, method);
        Ok(Resolution {
            action: ActionKind::Move,
            digest,
            path: member.clone(),
            new_path: Some(dest),
            link: None,
            freed_bytes: 0,
        })
    }

    fn apply_link(
        &self,
        index: &DuplicateIndex,
        bucket: &mut BucketEditor<'_>,
        member: &FilePath,
        target: &Path,
        kind: LinkKind,
    ) -> Result<Resolution, DedupError> {
        let digest = bucket.digest();
        let target = FilePath::new(target);
        let invalid = || {
            DedupError::from(InvariantViolation::InvalidLinkTarget {
                path: member.as_path().to_path_buf(),
                target: target.as_path().to_path_buf(),
            })
        };

        if &target == member {
            return Err(invalid());
        }
        let target_record = bucket.get(&target).ok_or_else(invalid)?;
        if target_record.is_symbolic_link() {
            return Err(invalid());
        }
        delete::verify_unchanged(target_record)?;
        if let Some(record) = bucket.get(member) {
            delete::verify_unchanged(record)?;
        }

        let outcome = link::replace_with_link(
            member.as_path(),
            target.as_path(),
            kind,
            self.policy.allow_symlink_fallback,
        )?;

        let info = LinkInfo {
            kind: outcome.kind,
            target: target.clone(),
        };
        let update = bucket.tag_link(member, info.clone()).and_then(|()| {
            if outcome.kind == LinkKind::Hard {
                if let Ok(meta) = fs::metadata(member.as_path()) {
                    return bucket.refresh(member, meta.len(), modified(&meta));
                }
            }
            Ok(())
        });
        if let Err(e) = update {
            return Err(desync(index, ActionKind::Link, member, &e));
        }

        Ok(Resolution {
            action: ActionKind::Link,
            digest,
            path: member.clone(),
            new_path: None,
            link: Some(info),
            freed_bytes: outcome.freed_bytes,
        })
    }

    fn apply_delete(
        &self,
        index: &DuplicateIndex,
        bucket: &mut BucketEditor<'_>,
        member: &FilePath,
    ) -> Result<Resolution, DedupError> {
        let digest = bucket.digest();
        let survivor = bucket
            .members()
            .iter()
            .any(|r| &r.path != member && !r.is_symbolic_link());
        if !survivor {
            return Err(InvariantViolation::LastCopy {
                digest,
                path: member.as_path().to_path_buf(),
            }
            .into());
        }
        refuse_if_link_target(bucket, member)?;

        let record = bucket
            .get(member)
            .cloned()
            .ok_or_else(|| unknown_member(digest, member))?;
        delete::verify_unchanged(&record)?;

        let freed = delete::reclaimable_bytes(member.as_path(), record.size);
        delete::remove_file(member.as_path(), self.policy.delete_mode)?;

        if let Err(e) = bucket.remove(member) {
            return Err(desync(index, ActionKind::Delete, member, &e));
        }

        log::info!("Deleted {} ({} bytes freed)", member, freed);
        Ok(Resolution {
            action: ActionKind::Delete,
            digest,
            path: member.clone(),
            new_path: None,
            link: None,
            freed_bytes: freed,
        })
    }
}

fn modified(meta: &fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

fn unknown_member(digest: Digest, path: &FilePath) -> DedupError {
    DedupError::UnknownMember {
        digest,
        path: path.as_path().to_path_buf(),
    }
}

fn refuse_if_link_target(bucket: &BucketEditor<'_>, member: &FilePath) -> Result<(), DedupError> {
    let tagged = bucket.members().iter().any(|r| {
        r.link
            .as_ref()
            .is_some_and(|l| l.kind == LinkKind::Symbolic && &l.target == member)
    });
    let aliased = bucket
        .get(member)
        .is_some_and(|record| has_live_symlink(record.path.as_path(), &record.symlink_aliases));
    if tagged || aliased {
        return Err(InvariantViolation::LinkedTarget {
            digest: bucket.digest(),
            path: member.as_path().to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Whether any of `aliases` still resolves to the file at `path`.
fn has_live_symlink(path: &Path, aliases: &[FilePath]) -> bool {
    if aliases.is_empty() {
        return false;
    }
    let Ok(resolved) = fs::canonicalize(path) else {
        return false;
    };
    aliases
        .iter()
        .any(|alias| fs::canonicalize(alias.as_path()).is_ok_and(|target| target == resolved))
}

/// Record an index update that failed after the disk already changed.
fn desync(index: &DuplicateIndex, action: ActionKind, path: &FilePath, error: &IndexError) -> DedupError {
    log::error!(
        "{} of {} succeeded on disk but the index update failed: {}",
        action,
        path,
        error
    );
    index.mark_stale(path.as_path());
    InvariantViolation::IndexDesync {
        action,
        path: path.as_path().to_path_buf(),
        reason: error.to_string(),
    }
    .into()
}
