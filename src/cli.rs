//! Command-line interface definitions for dupedex.
//!
//! # Example
//!
//! ```bash
//! # List duplicate groups
//! dupedex scan ~/Downloads
//!
//! # Machine-readable listing: {"<digest>": ["path", ...], ...}
//! dupedex scan ~/Downloads --json
//!
//! # Replace one copy with a hard link to another
//! dupedex resolve ~/Downloads --digest 3f2a... --path ~/Downloads/b.jpg \
//!     --link-to ~/Downloads/a.jpg
//!
//! # Delete one copy (refused if it is the last one)
//! dupedex resolve ~/Downloads --digest 3f2a... --path ~/Downloads/b.jpg --delete
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::actions::DeleteMode;
use crate::config::EngineConfig;
use crate::scanner::SymlinkPolicy;

/// Duplicate file indexer with safe move / link / delete resolution.
#[derive(Debug, Parser)]
#[command(name = "dupedex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report failures as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE", env = "DUPEDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a directory and list duplicate groups
    Scan(ScanArgs),
    /// Scan a directory, then apply one action to one group member
    Resolve(ResolveArgs),
}

/// Symlink handling choices on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SymlinkArg {
    /// Ignore symbolic links
    Skip,
    /// Resolve links, counting each underlying file once
    Dedupe,
    /// Follow all links without folding aliases
    Follow,
}

impl From<SymlinkArg> for SymlinkPolicy {
    fn from(arg: SymlinkArg) -> Self {
        match arg {
            SymlinkArg::Skip => Self::Skip,
            SymlinkArg::Dedupe => Self::Dedupe,
            SymlinkArg::Follow => Self::Follow,
        }
    }
}

/// Walk and hashing options shared by both subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Minimum file size to consider (e.g., 1KB, 1MB, 1GiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Maximum file size to consider (e.g., 1KB, 1MB, 1GiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Glob patterns to ignore (can be specified multiple times)
    ///
    /// These patterns are added to the root's .gitignore.
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Symbolic link handling
    #[arg(long, value_enum, value_name = "POLICY")]
    pub symlinks: Option<SymlinkArg>,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Leave zero-byte files out of the index
    #[arg(long)]
    pub no_empty: bool,

    /// Only index files directly inside the root
    #[arg(long, conflicts_with = "max_depth")]
    pub no_recursive: bool,

    /// Deepest directory level to descend into (1 = root only)
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Number of hashing threads (default: 4)
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Give up on the scan after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl FilterArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut EngineConfig) {
        if self.min_size.is_some() {
            config.min_size = self.min_size;
        }
        if self.max_size.is_some() {
            config.max_size = self.max_size;
        }
        config.ignore_patterns.extend(self.ignore_patterns.iter().cloned());
        if let Some(policy) = self.symlinks {
            config.symlinks = policy.into();
        }
        if self.skip_hidden {
            config.skip_hidden = true;
        }
        if self.no_empty {
            config.include_empty = false;
        }
        if self.no_recursive {
            config.max_depth = Some(1);
        } else if self.max_depth.is_some() {
            config.max_depth = self.max_depth;
        }
        if let Some(n) = self.io_threads {
            config.io_threads = n;
        }
        if self.timeout.is_some() {
            config.scan_timeout_secs = self.timeout;
        }
    }
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory path to scan for duplicates
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Print the digest → paths map as JSON
    #[arg(long)]
    pub json: bool,

    /// Keep the first member of every group and move the rest into DIR
    #[arg(long, value_name = "DIR")]
    pub move_duplicates: Option<PathBuf>,

    #[command(flatten)]
    pub filters: FilterArgs,
}

/// Exactly one action for the resolve subcommand.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ActionArgs {
    /// Move the member to this path (never overwrites)
    #[arg(long, value_name = "DEST")]
    pub move_to: Option<PathBuf>,

    /// Replace the member with a link to this other member
    #[arg(long, value_name = "TARGET")]
    pub link_to: Option<PathBuf>,

    /// Delete the member (refused if it is the last copy)
    #[arg(long)]
    pub delete: bool,
}

/// Arguments for the resolve subcommand.
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Directory the group was found in
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Group digest (64 hex characters)
    #[arg(long, value_name = "HEX")]
    pub digest: String,

    /// Group member to act on
    #[arg(long, value_name = "PATH")]
    pub path: PathBuf,

    #[command(flatten)]
    pub action: ActionArgs,

    /// With --link-to: create a symbolic link instead of a hard link
    #[arg(long, requires = "link_to")]
    pub symbolic: bool,

    /// With --link-to: use a symbolic link when a hard link would cross filesystems
    #[arg(long, requires = "link_to")]
    pub allow_symlink_fallback: bool,

    /// With --delete: move to the system trash instead of deleting
    #[arg(long, requires = "delete")]
    pub trash: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

impl ResolveArgs {
    /// Overlay resolution flags onto `config`.
    pub fn apply(&self, config: &mut EngineConfig) {
        self.filters.apply(config);
        if self.allow_symlink_fallback {
            config.allow_symlink_fallback = true;
        }
        if self.trash {
            config.delete_mode = DeleteMode::Trash;
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports decimal (KB, MB, GB, TB) and binary (KiB, MiB, GiB, TiB)
/// suffixes, case-insensitive, with optional fractions.
///
/// # Errors
///
/// A message for empty input, a bad number or an unknown suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1_000);
        assert_eq!(parse_size("1kib").unwrap(), 1_024);
        assert_eq!(parse_size("1.5MB").unwrap(), 1_500_000);
        assert_eq!(parse_size("1GiB").unwrap(), 1_073_741_824);
        assert!(parse_size("").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn test_resolve_requires_one_action() {
        let base = ["dupedex", "resolve", "/r", "--digest", "ab", "--path", "/r/a"];
        assert!(Cli::try_parse_from(base).is_err());

        let mut both = base.to_vec();
        both.extend(["--delete", "--move-to", "/r/b"]);
        assert!(Cli::try_parse_from(both).is_err());

        let mut link = base.to_vec();
        link.extend(["--link-to", "/r/b", "--symbolic"]);
        let cli = Cli::try_parse_from(link).unwrap();
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.action.link_to, Some(PathBuf::from("/r/b")));
                assert!(args.symbolic);
            }
            Commands::Scan(_) => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_trash_requires_delete() {
        let args = [
            "dupedex", "resolve", "/r", "--digest", "ab", "--path", "/r/a", "--move-to", "/r/b",
            "--trash",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_filters_overlay_config() {
        let cli = Cli::try_parse_from([
            "dupedex",
            "scan",
            "/data",
            "--min-size",
            "1KB",
            "--no-empty",
            "--symlinks",
            "skip",
            "-i",
            "*.tmp",
        ])
        .unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        let mut config = EngineConfig::default();
        args.filters.apply(&mut config);
        assert_eq!(config.min_size, Some(1_000));
        assert!(!config.include_empty);
        assert_eq!(config.symlinks, SymlinkPolicy::Skip);
        assert_eq!(config.ignore_patterns, vec!["*.tmp".to_string()]);
        assert_eq!(config.io_threads, 4);
        assert!(config.max_depth.is_none());
    }

    #[test]
    fn test_no_recursive_and_move_duplicates() {
        let cli = Cli::try_parse_from([
            "dupedex",
            "scan",
            "/data",
            "--no-recursive",
            "--move-duplicates",
            "/data/dupes",
        ])
        .unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.move_duplicates, Some(PathBuf::from("/data/dupes")));
        let mut config = EngineConfig::default();
        args.filters.apply(&mut config);
        assert_eq!(config.max_depth, Some(1));

        let both = ["dupedex", "scan", "/data", "--no-recursive", "--max-depth", "3"];
        assert!(Cli::try_parse_from(both).is_err());
    }
}
