//! clientsync-core: install reconciliation engine
//!
//! Scans a game client installation, compares it with a remote manifest,
//! writes fetched files atomically and prunes files the manifest no longer
//! lists.

pub mod cancel;
pub mod config;
pub mod diff;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod path;
pub mod prune;
pub mod reconcile;
pub mod scan;
pub mod writer;

pub use cancel::CancelToken;
pub use config::{CONFIG_FILE, LauncherConfig, Preferences};
pub use diff::{DiffResult, diff};
pub use error::{Error, PruneFailure, Result};
pub use hash::{FileDigest, HashAlgorithm, hash_file};
pub use manifest::{Manifest, ManifestEntry};
pub use prune::{PruneReport, Pruner, prune_orphans};
pub use reconcile::{
    ContentSource, MirrorSource, ReconcileOptions, ReconcilePlan, ReconcileReport, Reconciler,
};
pub use scan::{Inventory, LocalFileRecord, Scanner, get_local_inventory};
pub use writer::{FileWriter, write_file};
