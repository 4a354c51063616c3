//! Engine configuration.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (the platform config dir, or an explicit path)
//! 3. `DUPEDEX_*` environment variables, e.g. `DUPEDEX_IO_THREADS=8`
//!
//! CLI flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::actions::{DeleteMode, ResolutionPolicy};
use crate::duplicates::{FinderConfig, LinkKind, DEFAULT_IO_THREADS};
use crate::scanner::{SymlinkPolicy, WalkerConfig, DEFAULT_CHUNK_SIZE};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DUPEDEX_";

/// Errors loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be read or did not match the schema.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The config file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        /// Target file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Invalid(Box::new(error))
    }
}

/// Everything an engine instance can be tuned with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hashing workers.
    pub io_threads: usize,
    /// Hash read size in bytes.
    pub chunk_size: usize,
    /// Index zero-byte files (they form one group).
    pub include_empty: bool,
    /// Skip dot-files and dot-directories.
    pub skip_hidden: bool,
    /// Smallest file size to index.
    pub min_size: Option<u64>,
    /// Largest file size to index.
    pub max_size: Option<u64>,
    /// Extra gitignore-style patterns.
    pub ignore_patterns: Vec<String>,
    /// Deepest directory level to index; 1 means the root only.
    pub max_depth: Option<usize>,
    /// On rescans, keep the digest of files whose size and mtime are
    /// unchanged instead of reading them again.
    pub skip_unchanged: bool,
    /// Symbolic link handling during the walk.
    pub symlinks: SymlinkPolicy,
    /// Link kind the CLI requests when none is given.
    pub link_kind: LinkKind,
    /// Fall back to a symbolic link for cross-filesystem hard links.
    pub allow_symlink_fallback: bool,
    /// Re-hash cross-filesystem move copies before removing the source.
    pub verify_cross_volume_moves: bool,
    /// Permanent delete or system trash.
    pub delete_mode: DeleteMode,
    /// Allow deleting every member of a group at once.
    pub allow_group_delete: bool,
    /// Abort scans that run longer than this many seconds.
    pub scan_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let policy = ResolutionPolicy::default();
        Self {
            io_threads: DEFAULT_IO_THREADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            include_empty: true,
            skip_hidden: false,
            min_size: None,
            max_size: None,
            ignore_patterns: Vec::new(),
            max_depth: None,
            skip_unchanged: true,
            symlinks: SymlinkPolicy::Dedupe,
            link_kind: LinkKind::Hard,
            allow_symlink_fallback: policy.allow_symlink_fallback,
            verify_cross_volume_moves: policy.verify_cross_volume_moves,
            delete_mode: policy.delete_mode,
            allow_group_delete: policy.allow_group_delete,
            scan_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults, the platform config file if present, then the
    /// environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if a layer has a malformed value.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = Self::default_path() {
            log::debug!("Config file: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)).extract()?)
    }

    /// Load defaults, the given TOML file, then the environment.
    ///
    /// A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if a layer has a malformed value.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Ok(Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?)
    }

    /// Write this configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] or [`ConfigError::Write`].
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write)?;
        }
        fs::write(path, content).map_err(write)?;
        log::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Platform-specific config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dupedex").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Walker settings.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            symlinks: self.symlinks,
            skip_hidden: self.skip_hidden,
            include_empty: self.include_empty,
            min_size: self.min_size,
            max_size: self.max_size,
            ignore_patterns: self.ignore_patterns.clone(),
            max_depth: self.max_depth,
        }
    }

    /// Scan pipeline settings, without cancellation or progress wiring.
    #[must_use]
    pub fn finder_config(&self) -> FinderConfig {
        let mut config = FinderConfig::default()
            .with_io_threads(self.io_threads)
            .with_chunk_size(self.chunk_size)
            .with_walker_config(self.walker_config())
            .with_skip_unchanged(self.skip_unchanged);
        if let Some(timeout) = self.scan_timeout() {
            config = config.with_timeout(timeout);
        }
        config
    }

    /// Resolution guards and modes.
    #[must_use]
    pub fn resolution_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy {
            allow_symlink_fallback: self.allow_symlink_fallback,
            verify_cross_volume_moves: self.verify_cross_volume_moves,
            delete_mode: self.delete_mode,
            allow_group_delete: self.allow_group_delete,
        }
    }

    /// Scan deadline, if configured.
    #[must_use]
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_secs.map(Duration::from_secs)
    }
}
