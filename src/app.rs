//! Binary glue: configuration, logging, Ctrl+C and output for the CLI.
//!
//! Everything here uses `anyhow`; the library below it reports typed
//! errors.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;

use crate::actions::{Resolution, ResolutionAction};
use crate::cli::{Cli, Commands, ResolveArgs, ScanArgs};
use crate::config::EngineConfig;
use crate::duplicates::{LinkKind, ScanSummary};
use crate::engine::DedupEngine;
use crate::error::{DedupError, ExitCode};
use crate::logging;
use crate::progress::Progress;
use crate::signal::{self, CancelToken};

/// Run the command described by `cli`.
///
/// # Errors
///
/// Any failure, with engine errors preserved in the chain so
/// [`ExitCode::for_error`] can classify them.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    if let Err(e) = logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("Warning: logging unavailable: {}", e);
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    }
    .context("Failed to load configuration")?;

    let cancel = match signal::install_handler() {
        Ok(token) => token,
        Err(e) => {
            log::warn!("Ctrl+C handler not installed: {}", e);
            CancelToken::new()
        }
    };

    match cli.command {
        Commands::Scan(args) => run_scan(args, config, cancel, cli.quiet),
        Commands::Resolve(args) => run_resolve(args, config, cancel, cli.quiet),
    }
}

fn build_engine(root: &Path, config: EngineConfig, cancel: CancelToken, show_progress: bool) -> DedupEngine {
    let engine = DedupEngine::new(root, config).with_cancel_token(cancel);
    if show_progress {
        engine.with_progress_callback(Arc::new(Progress::new(false)))
    } else {
        engine
    }
}

/// Turn an interrupted pass into the matching error.
fn check_complete(summary: &ScanSummary, config: &EngineConfig) -> Result<()> {
    if summary.timed_out {
        let limit = config.scan_timeout().unwrap_or_default();
        return Err(DedupError::TimedOut(limit).into());
    }
    if summary.interrupted {
        return Err(DedupError::Interrupted.into());
    }
    Ok(())
}

fn run_scan(args: ScanArgs, mut config: EngineConfig, cancel: CancelToken, quiet: bool) -> Result<ExitCode> {
    args.filters.apply(&mut config);
    let mut engine = build_engine(&args.path, config, cancel, !quiet && !args.json);
    let summary = engine
        .scan()
        .with_context(|| format!("Failed to scan {}", args.path.display()))?;
    check_complete(&summary, engine.config())?;

    let folder = engine.folder_index();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &folder)?;
        writeln!(out)?;
    } else {
        for group in folder.groups() {
            writeln!(
                out,
                "Group {} [{}] {} x {}",
                group.group_number,
                group.digest.short(),
                group.len(),
                ByteSize::b(group.size)
            )?;
            for member in &group.members {
                match &member.link {
                    Some(link) => writeln!(out, "  {} -> {} ({})", member.path, link.target, link.kind)?,
                    None => writeln!(out, "  {}", member.path)?,
                }
            }
        }
        if !quiet {
            writeln!(
                out,
                "{} files ({}) scanned, {} groups, {} reclaimable",
                summary.total_files,
                summary.total_size_display(),
                summary.duplicate_groups,
                summary.reclaimable_display()
            )?;
        }
    }

    for issue in &summary.issues {
        log::warn!("Skipped {}: {}", issue.path, issue.message);
    }
    drop(out);

    let mut failed_moves = 0usize;
    if let Some(dir) = &args.move_duplicates {
        let results = engine
            .move_duplicates(dir)
            .with_context(|| format!("Failed to prepare {}", dir.display()))?;
        for result in results {
            match result {
                Ok(resolution) => print_resolution(&resolution, args.json)?,
                Err(e) => {
                    log::warn!("{}", e);
                    failed_moves += 1;
                }
            }
        }
    }

    Ok(if folder.is_empty() {
        ExitCode::NoDuplicates
    } else if summary.has_issues() || failed_moves > 0 {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    })
}

fn run_resolve(args: ResolveArgs, mut config: EngineConfig, cancel: CancelToken, quiet: bool) -> Result<ExitCode> {
    args.apply(&mut config);
    let action = if let Some(dest) = &args.action.move_to {
        ResolutionAction::Move {
            destination: dest.clone(),
        }
    } else if let Some(target) = &args.action.link_to {
        let kind = if args.symbolic {
            LinkKind::Symbolic
        } else {
            config.link_kind
        };
        ResolutionAction::Link {
            target: target.clone(),
            kind,
        }
    } else {
        ResolutionAction::Delete
    };

    let mut engine = build_engine(&args.root, config, cancel, !quiet && !args.json);
    let summary = engine
        .scan()
        .with_context(|| format!("Failed to scan {}", args.root.display()))?;
    check_complete(&summary, engine.config())?;

    let resolution = engine.resolve_str(&args.digest, &args.path, action)?;
    print_resolution(&resolution, args.json)?;
    Ok(ExitCode::Success)
}

fn print_resolution(resolution: &Resolution, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, resolution)?;
        writeln!(out)?;
        return Ok(());
    }

    match (&resolution.new_path, &resolution.link) {
        (Some(new_path), _) => writeln!(out, "Moved {} -> {}", resolution.path, new_path)?,
        (None, Some(link)) => writeln!(
            out,
            "Linked {} -> {} ({}), freed {}",
            resolution.path,
            link.target,
            link.kind,
            ByteSize::b(resolution.freed_bytes)
        )?,
        (None, None) => writeln!(
            out,
            "Deleted {}, freed {}",
            resolution.path,
            ByteSize::b(resolution.freed_bytes)
        )?,
    }
    Ok(())
}
