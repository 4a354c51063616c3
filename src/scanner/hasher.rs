//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//!
//! This module provides the [`Hasher`] struct for computing 256-bit BLAKE3
//! digests of file contents. Files are read in fixed-size chunks, so peak
//! memory per hash is bounded by the chunk size regardless of file size.
//!
//! A false-positive match would let the resolution engine delete or relink a
//! file that is not actually a copy, so only a cryptographic digest is used.
//!
//! # Example
//!
//! ```no_run
//! use dupedex::scanner::Hasher;
//! use std::path::Path;
//!
//! let hasher = Hasher::new();
//! let digest = hasher.hash_file(Path::new("photo.jpg")).unwrap();
//! println!("{}", digest);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::HashError;

/// Default read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest chunk size accepted by [`Hasher::with_chunk_size`].
pub const MIN_CHUNK_SIZE: usize = 512;

/// A 256-bit BLAKE3 content digest.
///
/// Serialized as a 64-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest of a byte slice held in memory.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_bytes(*blake3::hash(data).as_bytes())
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parse a 64-character hex string.
    ///
    /// Returns `None` for wrong length or non-hex characters.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex.trim())
            .ok()
            .map(|hash| Self::from_bytes(*hash.as_bytes()))
    }

    /// Abbreviated form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = crate::error::DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| crate::error::DedupError::InvalidDigest(s.to_string()))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid digest hex"))
    }
}

/// Streaming BLAKE3 hasher.
///
/// Holds no per-file state, so one instance can be shared by every worker
/// in the hashing pool.
#[derive(Debug, Clone)]
pub struct Hasher {
    chunk_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default 64 KiB chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            shutdown_flag: None,
        }
    }

    /// Set the read chunk size. Values below [`MIN_CHUNK_SIZE`] are raised.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        self
    }

    /// Set the shutdown flag. It is checked between chunks; once set, the
    /// current read is abandoned with [`HashError::Interrupted`].
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Configured chunk size in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Hash the full contents of a file.
    ///
    /// # Errors
    ///
    /// - [`HashError::NotFound`] if the file vanished since discovery
    /// - [`HashError::PermissionDenied`] if it cannot be opened or read
    /// - [`HashError::Io`] for any other read failure
    /// - [`HashError::Interrupted`] if the shutdown flag was raised
    pub fn hash_file(&self, path: &Path) -> Result<Digest, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        self.hash_reader(file)
            .map_err(|e| match e {
                ReadFailure::Interrupted => HashError::Interrupted(path.to_path_buf()),
                ReadFailure::Io(e) => HashError::from_io(path, e),
            })
    }

    /// Hash everything readable from `reader`, chunk by chunk.
    fn hash_reader<R: Read>(&self, mut reader: R) -> Result<Digest, ReadFailure> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            if self.is_shutdown_requested() {
                return Err(ReadFailure::Interrupted);
            }
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReadFailure::Io(e)),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(Digest::from_bytes(*hasher.finalize().as_bytes()))
    }
}

enum ReadFailure {
    Interrupted,
    Io(io::Error),
}
