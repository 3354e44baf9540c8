//! Cargo-style progress output for clientsync
//!
//! ```text
//!     Scanning /games/otclient
//!      Scanned 1842 files (312.40 MiB)
//!     Fetching 12 files (4.21 MiB)...
//!       Pruned 3 orphaned files
//!       Synced 12 files in 1.84s
//! ```

use std::io::Write as _;
use std::time::{Duration, Instant};

/// Status verbs, right-aligned to 12 chars
struct Status;

impl Status {
    const SCANNING: &str = "Scanning";
    const SCANNED: &str = "Scanned";
    const FETCHING: &str = "Fetching";
    const PRUNED: &str = "Pruned";
    const WOULD_PRUNE: &str = "Would prune";
    const SYNCED: &str = "Synced";
    const UP_TO_DATE: &str = "Up to date";
    const FAILED: &str = "Failed";
}

fn print_styled(style: &console::Style, status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    print_styled(&console::Style::new().green().bold(), status, message);
}

fn print_warning(status: &str, message: &str) {
    print_styled(&console::Style::new().yellow().bold(), status, message);
}

pub fn size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Progress tracker for one command
pub struct Progress {
    start: Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn scanning(&self, root: &std::path::Path) {
        print_status(Status::SCANNING, &root.display().to_string());
    }

    pub fn scanned(&self, files: usize, bytes: u64) {
        print_status(
            Status::SCANNED,
            &format!("{files} file{} ({})", plural(files), size(bytes)),
        );
    }

    /// Spinner while files are fetched; the pool gives no per-file feedback
    pub fn fetch_spinner(&self, files: usize, bytes: u64) -> indicatif::ProgressBar {
        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) =
            indicatif::ProgressStyle::default_spinner().template("{spinner:.green} {msg:>12} {prefix}")
        {
            pb.set_style(style);
        }
        pb.set_message(Status::FETCHING);
        pb.set_prefix(format!("{files} file{} ({})...", plural(files), size(bytes)));
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn pruned(&self, removed: usize, dry_run: bool) {
        let verb = if dry_run {
            Status::WOULD_PRUNE
        } else {
            Status::PRUNED
        };
        print_status(verb, &format!("{removed} orphaned file{}", plural(removed)));
    }

    pub fn prune_failure(&self, path: &str, reason: &str) {
        print_warning(Status::FAILED, &format!("{path}: {reason}"));
    }

    pub fn up_to_date(&self, files: usize) {
        print_status(
            Status::UP_TO_DATE,
            &format!("{files} file{} match the manifest", plural(files)),
        );
    }

    /// Final summary line with elapsed time
    pub fn finish(&self, fetched: usize) {
        let elapsed = self.start.elapsed();
        let elapsed_str = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };
        print_status(
            Status::SYNCED,
            &format!("{fetched} file{} in {elapsed_str}", plural(fetched)),
        );
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
