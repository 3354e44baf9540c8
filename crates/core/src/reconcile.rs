//! Full reconciliation pass: scan, diff, fetch what is missing or stale,
//! then prune orphans
//!
//! Where fetched bytes come from is up to the caller through
//! [`ContentSource`]; [`MirrorSource`] serves them from a local directory.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::diff::{DiffResult, diff};
use crate::error::{Error, IoResultExt as _, Result};
use crate::hash::{FileDigest, HashAlgorithm};
use crate::manifest::{Manifest, ManifestEntry};
use crate::path::resolve_under;
use crate::prune::{PruneReport, Pruner};
use crate::scan::{Inventory, Scanner, default_concurrency};
use crate::writer::FileWriter;

/// Provider of file contents for paths listed in a manifest
pub trait ContentSource: Sync {
    /// Open the content for `path`; it is verified against `entry` while written
    ///
    /// # Errors
    /// Implementations return `Error::Io` (or any other variant) when the
    /// content cannot be provided.
    fn open(&self, path: &str, entry: &ManifestEntry) -> Result<Box<dyn Read + '_>>;
}

/// Serves content from a directory laid out like the installation
#[derive(Debug, Clone)]
pub struct MirrorSource {
    root: PathBuf,
}

impl MirrorSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ContentSource for MirrorSource {
    fn open(&self, path: &str, _entry: &ManifestEntry) -> Result<Box<dyn Read + '_>> {
        let full_path = resolve_under(&self.root, path)?;
        let file = File::open(&full_path).at(&full_path)?;
        Ok(Box::new(file))
    }
}

/// Tunables for a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub algorithm: HashAlgorithm,
    /// Concurrent hash and fetch workers
    pub concurrency: usize,
    /// Delete orphans after fetching
    pub prune: bool,
    pub remove_empty_dirs: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            concurrency: default_concurrency(),
            prune: true,
            remove_empty_dirs: false,
        }
    }
}

/// Local state and what needs to change
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub inventory: Inventory,
    pub diff: DiffResult,
}

/// What an applied plan changed
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Paths written, in path order
    pub fetched: Vec<String>,
    pub fetched_bytes: u64,
    /// `None` when pruning was disabled
    pub prune: Option<PruneReport>,
}

/// Drives one installation root towards a manifest
#[derive(Debug, Clone)]
pub struct Reconciler {
    root: PathBuf,
    options: ReconcileOptions,
    cancel: CancelToken,
}

impl Reconciler {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            options: ReconcileOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Token checked between per-file operations of every phase
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(&self.root)
            .algorithm(self.options.algorithm)
            .concurrency(self.options.concurrency)
            .cancel_token(self.cancel.clone())
    }

    /// Scan the root and compare it with `manifest`
    ///
    /// # Errors
    /// Returns an error if the scan fails or is cancelled.
    pub fn plan(&self, manifest: &Manifest) -> Result<ReconcilePlan> {
        let inventory = self.scanner().scan()?;
        let diff = diff(manifest, &inventory);
        info!(
            to_fetch = diff.to_fetch.len(),
            stale = diff.stale.len(),
            up_to_date = diff.up_to_date.len(),
            orphans = diff.orphans.len(),
            "planned reconciliation"
        );
        Ok(ReconcilePlan { inventory, diff })
    }

    /// Fetch every path in `plan.diff.to_fetch`, then prune if enabled
    ///
    /// Fetches run on up to `concurrency` workers; each write is verified
    /// against its manifest entry before it replaces anything.
    ///
    /// # Errors
    /// The first fetch or write failure aborts the pass. Pruning failures
    /// surface as `Error::PruneIncomplete` once every orphan was attempted.
    pub fn apply<S: ContentSource>(
        &self,
        manifest: &Manifest,
        plan: &ReconcilePlan,
        source: &S,
    ) -> Result<ReconcileReport> {
        let writer = FileWriter::new(&self.root).algorithm(self.options.algorithm);
        let targets: Vec<(&String, &ManifestEntry)> = plan
            .diff
            .to_fetch
            .iter()
            .map(|path| {
                manifest
                    .get(path)
                    .map(|entry| (path, entry))
                    .ok_or_else(|| Error::invalid_manifest(path, "planned path not in manifest"))
            })
            .collect::<Result<_>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|i| format!("clientsync-fetch-{i}"))
            .build()?;

        let digests: Vec<FileDigest> = pool.install(|| {
            targets
                .par_iter()
                .map(|(path, entry)| -> Result<FileDigest> {
                    self.cancel.check()?;
                    let reader = source.open(path, entry)?;
                    let digest = writer.write_stream(path, reader, Some(*entry))?;
                    debug!(path = %path, size = digest.size, "fetched");
                    Ok(digest)
                })
                .collect::<Result<_>>()
        })?;

        let mut report = ReconcileReport {
            fetched: targets.iter().map(|(path, _)| (*path).clone()).collect(),
            fetched_bytes: digests.iter().map(|d| d.size).sum(),
            prune: None,
        };

        if self.options.prune {
            let pruned = Pruner::new(&self.root)
                .remove_empty_dirs(self.options.remove_empty_dirs)
                .cancel_token(self.cancel.clone())
                .prune(manifest)?
                .into_result()?;
            report.prune = Some(pruned);
        }

        info!(
            fetched = report.fetched.len(),
            bytes = report.fetched_bytes,
            pruned = report.prune.as_ref().map_or(0, |p| p.removed.len()),
            "reconciliation complete"
        );
        Ok(report)
    }

    /// Plan and apply in one go
    ///
    /// # Errors
    /// See [`Reconciler::plan`] and [`Reconciler::apply`].
    pub fn run<S: ContentSource>(&self, manifest: &Manifest, source: &S) -> Result<ReconcileReport> {
        let plan = self.plan(manifest)?;
        self.apply(manifest, &plan, source)
    }
}
