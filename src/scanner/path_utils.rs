//! Path normalization utilities.
//!
//! Every path the engine stores is absolute and lexically clean so that a
//! path discovered by the walker and the same path supplied later by a
//! front end compare equal.
//!
//! # Background
//!
//! Canonicalized paths on Windows carry the verbatim prefix `\\?\`, which
//! front ends neither display nor send back. It is stripped here so the
//! string form at the boundary round-trips.
//!
//! # Example
//!
//! ```
//! use dupedex::scanner::path_utils::{clean_path, strip_verbatim_prefix};
//! use std::path::Path;
//!
//! assert_eq!(clean_path(Path::new("/a/./b/../c")), Path::new("/a/c"));
//! assert_eq!(strip_verbatim_prefix(r"\\?\C:\data"), r"C:\data");
//! ```

use std::path::{Component, Path, PathBuf};

/// Prefix added by `canonicalize` on Windows.
const VERBATIM_PREFIX: &str = r"\\?\";

/// Remove the Windows verbatim prefix from a path string, if present.
#[must_use]
pub fn strip_verbatim_prefix(s: &str) -> &str {
    s.strip_prefix(VERBATIM_PREFIX).unwrap_or(s)
}

/// Lexically normalize a path: drop `.` components and fold `..` into
/// their parent.
///
/// No filesystem access is performed, so symlinks are not resolved.
/// A `..` at the root is discarded.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make a path absolute and lexically clean.
///
/// Relative paths are resolved against the current working directory.
/// If the working directory cannot be determined the path is only cleaned.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let text = absolute.to_string_lossy();
    let stripped = strip_verbatim_prefix(&text);
    if stripped.len() != text.len() {
        return clean_path(Path::new(stripped));
    }
    clean_path(&absolute)
}

/// String form of a path for the presentation boundary.
#[must_use]
pub fn display_string(path: &Path) -> String {
    strip_verbatim_prefix(&path.to_string_lossy()).to_string()
}
