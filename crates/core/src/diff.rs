//! Classify manifest and local paths: up to date, to fetch, orphaned

use std::collections::BTreeSet;

use serde::Serialize;

use crate::manifest::Manifest;
use crate::scan::Inventory;

/// Outcome of comparing a manifest against a local inventory
///
/// Every manifest path is in exactly one of `to_fetch` / `up_to_date`;
/// every local path is in exactly one of `up_to_date` / `stale` / `orphans`.
/// A stale local path is also in `to_fetch`, since it gets refetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    /// In the manifest, missing locally or with different content
    pub to_fetch: BTreeSet<String>,
    /// Subset of `to_fetch` that exists locally but is stale
    pub stale: BTreeSet<String>,
    /// In the manifest and locally identical in size and hash
    pub up_to_date: BTreeSet<String>,
    /// Present locally, absent from the manifest
    pub orphans: BTreeSet<String>,
}

impl DiffResult {
    /// Paths to fetch that do not exist locally at all
    pub fn missing(&self) -> impl Iterator<Item = &String> {
        self.to_fetch.difference(&self.stale)
    }

    /// Nothing to fetch and nothing to delete
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.to_fetch.is_empty() && self.orphans.is_empty()
    }

    /// Total bytes the manifest expects for everything in `to_fetch`
    #[must_use]
    pub fn fetch_bytes(&self, manifest: &Manifest) -> u64 {
        self.to_fetch
            .iter()
            .filter_map(|path| manifest.get(path))
            .map(|entry| entry.size)
            .sum()
    }
}

/// Compare a manifest with what is on disk
///
/// A file is up to date only when both size and hash match.
#[must_use]
pub fn diff(manifest: &Manifest, inventory: &Inventory) -> DiffResult {
    let mut result = DiffResult::default();

    for (path, expected) in manifest {
        match inventory.get(path) {
            None => {
                result.to_fetch.insert(path.clone());
            }
            Some(local) if local.size != expected.size || local.hash != expected.hash => {
                result.to_fetch.insert(path.clone());
                result.stale.insert(path.clone());
            }
            Some(_) => {
                result.up_to_date.insert(path.clone());
            }
        }
    }

    for path in inventory.paths() {
        if !manifest.contains(path) {
            result.orphans.insert(path.clone());
        }
    }

    result
}
