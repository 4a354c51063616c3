//! Cancellation and Ctrl+C handling.
//!
//! A [`CancelToken`] wraps an `AtomicBool` shared by everything that does
//! long-running work for one engine: the walker, the hashing pool and the
//! scan driver all poll it. Each engine owns its own token, so cancelling
//! one scan never touches another.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dupedex::signal::install_handler;
//!
//! let token = install_handler().expect("Failed to install signal handler");
//! // Pass token.clone() to DedupEngine::with_cancel_token
//! if token.is_cancelled() {
//!     return;
//! }
//! ```
//!
//! When Ctrl+C is received the token is cancelled, "Interrupted. Cleaning
//! up..." is printed to stderr, and the CLI exits with code 130.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared cancellation flag.
///
/// Clones share state. `Send` and `Sync`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the flag so the token can drive another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// The underlying flag, for components that poll an `AtomicBool`.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_TOKEN: OnceLock<CancelToken> = OnceLock::new();

/// Install a Ctrl+C handler that cancels the returned token.
///
/// Call once, early, before any long-running work. A second call in the
/// same process (tests running `run_app` in parallel) gets the already
/// registered token back, reset.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] only when the hook cannot be
/// registered and no token was registered earlier in this process.
pub fn install_handler() -> Result<CancelToken, SignalError> {
    if let Some(token) = GLOBAL_TOKEN.get() {
        token.reset();
        return Ok(token.clone());
    }

    let token = CancelToken::new();
    let flag = token.flag();

    match ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);

        let _ = writeln!(std::io::stderr(), "\nInterrupted. Cleaning up...");
        let _ = std::io::stderr().flush();

        log::info!("Shutdown signal received");
    }) {
        Ok(()) => {
            let _ = GLOBAL_TOKEN.set(token.clone());
            Ok(token)
        }
        Err(e) => match GLOBAL_TOKEN.get() {
            Some(existing) => {
                existing.reset();
                Ok(existing.clone())
            }
            None if matches!(e, ctrlc::Error::MultipleHandlers) => {
                log::debug!("Ctrl+C handler already registered, using unhooked token");
                let _ = GLOBAL_TOKEN.set(token.clone());
                Ok(token)
            }
            None => Err(SignalError::InstallFailed(e)),
        },
    }
}
