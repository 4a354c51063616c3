//! Progress reporting utilities using indicatif.
//!
//! The scan pipeline reports through the [`ProgressCallback`] trait; the
//! [`Progress`] struct implements it with terminal progress bars for the
//! CLI. Walking and hashing overlap, so a scan shows one bar whose length
//! grows as the walker discovers files.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase name used while walking and hashing run together.
pub const PHASE_SCAN: &str = "scan";

/// Phase name used while dropping records for vanished files.
pub const PHASE_PRUNE: &str = "prune";

/// Progress callback for the scan pipeline.
///
/// Implement this trait to receive progress updates. Methods are called
/// from hashing worker threads, so implementations must be thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// `total` is 0 when the amount of work is not yet known.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called when the walker has discovered `discovered` files so far.
    fn on_discovered(&self, _discovered: usize) {}

    /// Called for each file hashed; `current` is 1-based.
    fn on_progress(&self, current: usize, path: &str);

    /// Called when an item has been processed, providing its size.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    scan: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Examples
    ///
    /// ```
    /// use dupedex::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            scan: Mutex::new(None),
            quiet,
        }
    }

    fn scan_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} hashed {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(ref pb) = *lock(&self.scan) {
            f(pb);
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        match phase {
            PHASE_SCAN => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::scan_style());
                pb.enable_steady_tick(Duration::from_millis(100));
                *lock(&self.scan) = Some(pb);
            }
            _ => self.with_bar(|pb| pb.set_message(format!("{}...", phase))),
        }
    }

    fn on_discovered(&self, discovered: usize) {
        if self.quiet {
            return;
        }
        self.with_bar(|pb| pb.set_length(discovered as u64));
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        self.with_bar(|pb| {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 30));
        });
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet || phase != PHASE_SCAN {
            return;
        }
        if let Some(pb) = lock(&self.scan).take() {
            pb.finish_and_clear();
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        let message = message.to_string();
        self.with_bar(|pb| pb.set_message(message));
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len >= max_len {
        let tail: String = file_name.chars().skip(name_len + 3 - max_len).collect();
        return format!("...{}", tail);
    }

    format!(".../{}", file_name)
}
