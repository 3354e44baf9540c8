//! Error taxonomy for reconciliation

use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout `clientsync-core`
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while reconciling an installation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem read, write or delete failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A manifest entry is malformed
    #[error("invalid manifest entry {path:?}: {reason}")]
    InvalidManifest { path: String, reason: String },

    /// A relative path would resolve outside the installation root
    #[error("refusing to touch path outside install root: {0:?}")]
    PathEscapesRoot(String),

    /// Payload did not match the manifest entry it was written for
    #[error(
        "content mismatch for {path}: expected {expected_size} bytes ({expected_hash}), \
         got {actual_size} bytes ({actual_hash})"
    )]
    IntegrityMismatch {
        path: String,
        expected_size: u64,
        expected_hash: String,
        actual_size: u64,
        actual_hash: String,
    },

    /// One or more orphans could not be deleted
    #[error("failed to delete {} orphaned file(s), first: {}", failures.len(), first_failure(failures))]
    PruneIncomplete { failures: Vec<PruneFailure> },

    /// The selected client has no configured executable
    #[error("no executable configured for client {0:?}")]
    UnknownClient(String),

    /// The pass was cancelled between per-file operations
    #[error("operation cancelled")]
    Cancelled,

    /// Directory traversal failed
    #[error("directory walk failed: {0}")]
    Walk(#[from] ignore::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// A single orphan that could not be deleted
#[derive(Debug)]
pub struct PruneFailure {
    /// Manifest-style relative path of the orphan
    pub path: String,
    pub source: io::Error,
}

fn first_failure(failures: &[PruneFailure]) -> String {
    failures
        .first()
        .map(|f| format!("{}: {}", f.path, f.source))
        .unwrap_or_default()
}

impl Error {
    /// Whether this is a filesystem-level failure
    ///
    /// Covers read/write/delete errors, failed directory walks, and paths
    /// refused for resolving outside the install root.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::PruneIncomplete { .. } | Self::Walk(_) | Self::PathEscapesRoot(_)
        )
    }

    pub(crate) fn invalid_manifest(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Attach the offending path to an `io::Error`
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
