//! Moving a file without ever overwriting or losing it.
//!
//! A same-filesystem move is a single `rename`. Across filesystems the file
//! is copied, optionally re-hashed to catch copy corruption, and only then
//! is the source removed. Any failure before the source is removed deletes
//! the partial copy, leaving the disk as it was.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::DedupError;
use crate::scanner::{Digest, Hasher};

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Atomic rename on one filesystem
    Renamed,
    /// Copy to the destination filesystem, then remove the source
    Copied {
        /// Whether the copy was re-hashed before removing the source
        verified: bool,
    },
}

/// Whether `error` means the rename crossed a filesystem boundary.
pub(crate) fn is_cross_device(error: &io::Error) -> bool {
    // EXDEV on Unix, ERROR_NOT_SAME_DEVICE on Windows
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18;
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17;
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    error.raw_os_error() == Some(CROSS_DEVICE)
}

/// Fail with [`DedupError::Conflict`] if anything exists at `destination`,
/// a dangling symlink included.
///
/// # Errors
///
/// [`DedupError::Conflict`] if the destination is taken.
pub fn ensure_vacant(destination: &Path) -> Result<(), DedupError> {
    match fs::symlink_metadata(destination) {
        Ok(_) => Err(DedupError::Conflict(destination.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DedupError::from_io(destination, e)),
    }
}

/// First free path for `file_name` inside `folder`.
///
/// Taken names get a counter before the extension: `photo.jpg`,
/// `photo(1).jpg`, `photo(2).jpg`, ...
#[must_use]
pub fn unique_destination(folder: &Path, file_name: &OsStr) -> PathBuf {
    let first = folder.join(file_name);
    if fs::symlink_metadata(&first).is_err() {
        return first;
    }
    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map_or_else(|| file_name.to_string_lossy(), OsStr::to_string_lossy);
    let ext = name.extension().map(OsStr::to_string_lossy);
    (1u64..)
        .map(|n| match &ext {
            Some(ext) => folder.join(format!("{}({}).{}", stem, n, ext)),
            None => folder.join(format!("{}({})", stem, n)),
        })
        .find(|candidate| fs::symlink_metadata(candidate).is_err())
        .unwrap_or(first)
}

/// Move `source` to `destination`.
///
/// `verify`, when set, is the hasher and expected digest used to check a
/// cross-filesystem copy before the source is removed.
///
/// # Errors
///
/// - [`DedupError::Conflict`] if `destination` exists
/// - [`DedupError::Io`] / [`DedupError::Access`] on filesystem failure,
///   including a copy whose digest does not match
pub fn move_file(
    source: &Path,
    destination: &Path,
    verify: Option<(&Hasher, Digest)>,
) -> Result<MoveMethod, DedupError> {
    ensure_vacant(destination)?;

    match fs::rename(source, destination) {
        Ok(()) => {
            log::debug!("Renamed {} -> {}", source.display(), destination.display());
            Ok(MoveMethod::Renamed)
        }
        Err(e) if is_cross_device(&e) => {
            log::debug!(
                "{} and {} are on different filesystems, copying",
                source.display(),
                destination.display()
            );
            copy_then_remove(source, destination, verify)
        }
        Err(e) => Err(DedupError::from_io(source, e)),
    }
}

fn copy_then_remove(
    source: &Path,
    destination: &Path,
    verify: Option<(&Hasher, Digest)>,
) -> Result<MoveMethod, DedupError> {
    let rollback = |error: DedupError| {
        if let Err(e) = fs::remove_file(destination) {
            log::warn!(
                "Could not remove partial copy {}: {}",
                destination.display(),
                e
            );
        }
        error
    };

    // create_new refuses to clobber anything that appeared since the check
    let mut reader = fs::File::open(source).map_err(|e| DedupError::from_io(source, e))?;
    let mut writer = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => DedupError::Conflict(destination.to_path_buf()),
            _ => DedupError::from_io(destination, e),
        })?;

    io::copy(&mut reader, &mut writer)
        .and_then(|_| writer.sync_all())
        .map_err(|e| rollback(DedupError::from_io(destination, e)))?;
    drop(writer);

    if let Ok(meta) = fs::metadata(source) {
        if let Err(e) = fs::set_permissions(destination, meta.permissions()) {
            log::debug!("Could not copy permissions to {}: {}", destination.display(), e);
        }
    }

    let verified = match verify {
        Some((hasher, expected)) => {
            let actual = hasher
                .hash_file(destination)
                .map_err(|e| rollback(DedupError::Io {
                    path: destination.to_path_buf(),
                    source: io::Error::other(e.to_string()),
                }))?;
            if actual != expected {
                log::error!(
                    "Copy of {} does not match its digest ({} != {})",
                    source.display(),
                    actual.short(),
                    expected.short()
                );
                return Err(rollback(DedupError::Io {
                    path: destination.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::InvalidData, "copy verification failed"),
                }));
            }
            true
        }
        None => false,
    };

    fs::remove_file(source).map_err(|e| rollback(DedupError::from_io(source, e)))?;
    Ok(MoveMethod::Copied { verified })
}
