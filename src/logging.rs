//! Logging setup for the dupedex binary.
//!
//! The library only emits through the `log` facade; this module installs
//! the `env_logger` backend. Levels are chosen by, in priority order:
//!
//! 1. `RUST_LOG` (if set)
//! 2. `--quiet` (errors only) or `--verbose` (debug, `-vv` trace)
//! 3. Default: warnings, so a scan prints only its results
//!
//! Flag-derived levels apply to dupedex's own modules; dependencies stay
//! at `warn`.
//!
//! ```rust,no_run
//! use dupedex::logging::init_logging;
//!
//! init_logging(1, false).ok();
//! log::debug!("visible with -v");
//! ```

use env_logger::Builder;
use log::{LevelFilter, SetLoggerError};
use std::env;
use std::io::Write;

/// Install the logger.
///
/// # Errors
///
/// Fails if a logger is already installed in this process.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<(), SetLoggerError> {
    let mut builder = Builder::new();

    let from_env = env::var("RUST_LOG").is_ok();
    if from_env {
        builder.parse_default_env();
    } else {
        builder
            .filter_level(LevelFilter::Warn)
            .filter_module(env!("CARGO_CRATE_NAME"), determine_level(verbose, quiet));
    }

    configure_format(&mut builder, verbose);
    builder.try_init()?;

    log::debug!(
        "Logging initialized at {} ({})",
        log::max_level(),
        if from_env { "RUST_LOG" } else { "flags" }
    );
    Ok(())
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Debug builds and `-v` get timestamps and module paths; otherwise
/// level and message only.
fn configure_format(builder: &mut Builder, verbose: u8) {
    let detailed = cfg!(debug_assertions) || verbose > 0;
    builder.format(move |buf, record| {
        let level = record.level();
        let style = buf.default_level_style(level);
        if detailed {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} [{}] {}",
                buf.timestamp_seconds(),
                level,
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(buf, "{style}{:<5}{style:#} {}", level, record.args())
        }
    });
}
