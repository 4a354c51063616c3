//! Replacing a duplicate with a link to another copy.
//!
//! The link is first created under a temporary name in the same directory
//! and then renamed over the duplicate, so `path` always names either the
//! original file or the finished link, never nothing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::duplicates::LinkKind;
use crate::error::DedupError;
use crate::scanner::identity::{self, FileIdentity};

use super::relocate::is_cross_device;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What a link operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Kind of link actually created
    pub kind: LinkKind,
    /// Bytes released by dropping `path`'s own copy
    pub freed_bytes: u64,
}

/// Sibling temporary path for building the replacement.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.dupedex-{}-{}.tmp", name, std::process::id(), n))
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

fn create_link(kind: LinkKind, target: &Path, link: &Path) -> io::Result<()> {
    match kind {
        LinkKind::Hard => fs::hard_link(target, link),
        LinkKind::Symbolic => make_symlink(target, link),
    }
}

/// Bytes freed by replacing `path` with a link to `target`.
fn freed_by_replacing(path_meta: &fs::Metadata, target_meta: &fs::Metadata) -> u64 {
    let same_file = match (
        FileIdentity::from_metadata(path_meta),
        FileIdentity::from_metadata(target_meta),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if path_meta.file_type().is_symlink() || same_file || identity::link_count(path_meta) > 1 {
        0
    } else {
        path_meta.len()
    }
}

/// Replace `path` with a `kind` link to `target`.
///
/// A hard link across filesystems fails with [`DedupError::CrossVolume`]
/// unless `allow_symlink_fallback` is set, in which case a symbolic link is
/// created instead and reported in the outcome.
///
/// # Errors
///
/// - [`DedupError::CrossVolume`] as described above
/// - [`DedupError::PathNotFound`] if either file is gone
/// - [`DedupError::Io`] / [`DedupError::Access`] on filesystem failure
pub fn replace_with_link(
    path: &Path,
    target: &Path,
    kind: LinkKind,
    allow_symlink_fallback: bool,
) -> Result<LinkOutcome, DedupError> {
    let path_meta = fs::symlink_metadata(path).map_err(|e| DedupError::from_io(path, e))?;
    let target_meta = fs::metadata(target).map_err(|e| DedupError::from_io(target, e))?;
    let freed_bytes = freed_by_replacing(&path_meta, &target_meta);

    let cross_volume = || -> Result<LinkKind, DedupError> {
        if allow_symlink_fallback {
            log::info!(
                "{} and {} are on different filesystems, using a symbolic link",
                path.display(),
                target.display()
            );
            Ok(LinkKind::Symbolic)
        } else {
            Err(DedupError::CrossVolume {
                path: path.to_path_buf(),
                target: target.to_path_buf(),
            })
        }
    };

    let mut kind = kind;
    if kind == LinkKind::Hard && identity::same_device(&path_meta, &target_meta) == Some(false) {
        kind = cross_volume()?;
    }

    let temp = temp_sibling(path);
    if let Err(e) = create_link(kind, target, &temp) {
        if kind == LinkKind::Hard && is_cross_device(&e) {
            kind = cross_volume()?;
            create_link(kind, target, &temp).map_err(|e| DedupError::from_io(&temp, e))?;
        } else {
            return Err(DedupError::from_io(&temp, e));
        }
    }

    if let Err(e) = fs::rename(&temp, path) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            log::warn!("Could not remove {}: {}", temp.display(), cleanup);
        }
        return Err(DedupError::from_io(path, e));
    }

    log::info!(
        "Replaced {} with a {} link to {} ({} bytes freed)",
        path.display(),
        kind,
        target.display(),
        freed_bytes
    );
    Ok(LinkOutcome { kind, freed_bytes })
}
