//! Session logging for clientsync
//!
//! Every run writes a trace log to `<temp dir>/clientsync-{session_id}.log`
//! next to the regular console output. The session ID is a fresh UUID.

use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Default file filter when `RUST_LOG` is unset
const FILE_FILTER: &str = "warn,clientsync=trace,clientsync_core=trace";

/// Keeps the non-blocking file writer flushing until dropped
pub struct DebugLogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

pub struct SessionInfo {
    pub log_path: PathBuf,
    pub guard: DebugLogGuard,
}

fn log_file_name(session_id: uuid::Uuid) -> String {
    format!("clientsync-{session_id}.log")
}

/// Initialize file (detailed) plus console (warn, or debug when verbose) logging.
///
/// The returned guard must live until the program exits.
pub fn init(verbose: bool) -> SessionInfo {
    let log_dir = std::env::temp_dir();
    let log_filename = log_file_name(uuid::Uuid::new_v4());
    let log_path = log_dir.join(&log_filename);

    let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(FILE_FILTER));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    // Status lines already cover progress; the console only gets problems
    // unless asked for more.
    let console_level = if verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    SessionInfo {
        log_path,
        guard: DebugLogGuard { _guard: guard },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_contains_session() {
        let id = uuid::Uuid::new_v4();
        let name = log_file_name(id);
        assert!(name.starts_with("clientsync-"));
        assert!(name.ends_with(".log"));
        assert!(name.contains(&id.to_string()));
    }
}
