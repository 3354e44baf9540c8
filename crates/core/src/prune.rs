//! Delete local files that the manifest no longer lists
//!
//! Failure policy is best-effort: every orphan is attempted, failed
//! deletions are collected with their paths, and the caller decides.
//! Files the manifest lists are never touched, even when stale.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, PruneFailure, Result};
use crate::manifest::Manifest;
use crate::path::resolve_under;
use crate::scan::{LocalPath, Scanner};

/// What a prune pass did
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Orphans deleted by this pass
    pub removed: Vec<String>,
    /// Orphans that no longer existed when their turn came
    pub already_gone: Vec<String>,
    /// Directories removed because pruning left them empty
    pub removed_dirs: Vec<String>,
    /// Orphans that could not be deleted
    pub failures: Vec<PruneFailure>,
}

impl PruneReport {
    /// True when no deletion failed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn collected failures into `Error::PruneIncomplete`
    ///
    /// # Errors
    /// Returns `Error::PruneIncomplete` if any deletion failed.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::PruneIncomplete {
                failures: self.failures,
            })
        }
    }
}

/// Serializable summary for reporting
#[derive(Debug, Serialize)]
pub struct PruneSummary<'a> {
    pub removed: &'a [String],
    pub already_gone: &'a [String],
    pub removed_dirs: &'a [String],
    pub failed: Vec<(&'a str, String)>,
}

impl PruneReport {
    /// Borrowing view suitable for JSON output
    #[must_use]
    pub fn summary(&self) -> PruneSummary<'_> {
        PruneSummary {
            removed: &self.removed,
            already_gone: &self.already_gone,
            removed_dirs: &self.removed_dirs,
            failed: self
                .failures
                .iter()
                .map(|f| (f.path.as_str(), f.source.to_string()))
                .collect(),
        }
    }
}

/// Removes orphaned files below one installation root
#[derive(Debug, Clone)]
pub struct Pruner {
    root: PathBuf,
    remove_empty_dirs: bool,
    dry_run: bool,
    cancel: CancelToken,
}

impl Pruner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remove_empty_dirs: false,
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }

    /// Also remove directories that end up empty (never the root)
    #[must_use]
    pub fn remove_empty_dirs(mut self, enabled: bool) -> Self {
        self.remove_empty_dirs = enabled;
        self
    }

    /// Report what would be deleted without deleting
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Token checked before each deletion
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Walk the root and delete every file whose key is not in `manifest`
    ///
    /// A missing root is a no-op.
    ///
    /// # Errors
    /// Returns an error if the walk fails or the pass is cancelled; per-file
    /// deletion failures are collected in the report instead.
    pub fn prune(&self, manifest: &Manifest) -> Result<PruneReport> {
        let walker = Scanner::new(&self.root).cancel_token(self.cancel.clone());
        let orphans: Vec<LocalPath> = walker
            .scan_paths()?
            .into_iter()
            .filter(|local| !manifest.contains(&local.relative))
            .collect();

        self.delete_all(orphans)
    }

    /// Delete a precomputed orphan set, e.g. `DiffResult::orphans`
    ///
    /// Paths are resolved under the root; files that do not exist are listed
    /// in `already_gone`, never in `removed`.
    ///
    /// # Errors
    /// Returns `Error::PathEscapesRoot` for a path outside the root, or
    /// `Error::Cancelled`.
    pub fn prune_paths<'a, I>(&self, orphans: I) -> Result<PruneReport>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let orphans = orphans
            .into_iter()
            .map(|relative| -> Result<LocalPath> {
                Ok(LocalPath {
                    absolute: resolve_under(&self.root, relative)?,
                    relative: relative.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.delete_all(orphans)
    }

    fn delete_all(&self, orphans: Vec<LocalPath>) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let mut touched_dirs = BTreeSet::new();

        for orphan in orphans {
            self.cancel.check()?;

            if self.dry_run {
                debug!(path = %orphan.relative, "would delete orphan");
                report.removed.push(orphan.relative);
                continue;
            }

            match remove_regular_file(&orphan.absolute) {
                Ok(false) => {
                    debug!(path = %orphan.relative, "orphan already gone");
                    report.already_gone.push(orphan.relative);
                }
                Ok(true) => {
                    debug!(path = %orphan.relative, "deleted orphan");
                    if let Some(parent) = orphan.absolute.parent() {
                        touched_dirs.insert(parent.to_path_buf());
                    }
                    report.removed.push(orphan.relative);
                }
                Err(source) => {
                    warn!(path = %orphan.relative, error = %source, "failed to delete orphan");
                    report.failures.push(PruneFailure {
                        path: orphan.relative,
                        source,
                    });
                }
            }
        }

        if self.remove_empty_dirs {
            report.removed_dirs = self.remove_emptied(touched_dirs);
        }

        info!(
            root = %self.root.display(),
            removed = report.removed.len(),
            failed = report.failures.len(),
            dry_run = self.dry_run,
            "prune complete"
        );
        Ok(report)
    }

    /// Walk up from each touched directory, removing it while empty
    fn remove_emptied(&self, dirs: BTreeSet<PathBuf>) -> Vec<String> {
        let mut removed = Vec::new();
        // Reverse order visits descendants before their ancestors.
        for dir in dirs.into_iter().rev() {
            let mut current = Some(dir.as_path());
            while let Some(path) = current {
                if path == self.root || !path.starts_with(&self.root) {
                    break;
                }
                if fs::remove_dir(path).is_err() {
                    break;
                }
                if let Some(key) = path
                    .strip_prefix(&self.root)
                    .ok()
                    .and_then(crate::path::to_manifest_key)
                {
                    removed.push(key);
                }
                current = path.parent();
            }
        }
        removed
    }
}

/// Delete a file, refusing non-files
///
/// Returns `false` when there was nothing to delete.
fn remove_regular_file(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_file() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )),
        Ok(_) => match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete every file under `root` that `manifest` does not list
///
/// # Errors
/// Returns `Error::PruneIncomplete` listing each file that could not be
/// deleted, after attempting all of them.
pub fn prune_orphans(root: &Path, manifest: &Manifest) -> Result<PruneReport> {
    Pruner::new(root).prune(manifest)?.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use crate::manifest::ManifestEntry;
    use tempfile::TempDir;

    fn manifest_for(files: &[(&str, &[u8])]) -> Manifest {
        let mut manifest = Manifest::new();
        for (path, content) in files {
            let d = hash_bytes(content, HashAlgorithm::Blake3);
            manifest
                .insert(*path, ManifestEntry::new(d.size, d.hash))
                .unwrap();
        }
        manifest
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_prune_removes_only_orphans() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "sub/b.txt", b"abc");
        write(dir.path(), "old.txt", b"stale leftover");
        write(dir.path(), "sub/older.dll", b"x");

        let manifest = manifest_for(&[("a.txt", b"hello"), ("sub/b.txt", b"abc")]);
        let report = prune_orphans(dir.path(), &manifest).unwrap();

        assert_eq!(report.removed, vec!["old.txt", "sub/older.dll"]);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dir.path().join("sub/b.txt")).unwrap(), b"abc");
        assert!(!dir.path().join("old.txt").exists());
    }

    #[test]
    fn test_stale_manifest_files_are_kept() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"outdated content");

        let manifest = manifest_for(&[("a.txt", b"hello")]);
        let report = prune_orphans(dir.path(), &manifest).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"outdated content");
    }

    #[test]
    fn test_prune_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "old.txt", b"x");
        let manifest = manifest_for(&[("a.txt", b"hello")]);

        let first = prune_orphans(dir.path(), &manifest).unwrap();
        let second = prune_orphans(dir.path(), &manifest).unwrap();

        assert_eq!(first.removed, vec!["old.txt"]);
        assert!(second.removed.is_empty());
    }

    #[test]
    fn test_missing_root_is_noop() {
        let dir = TempDir::new().unwrap();
        let report = prune_orphans(&dir.path().join("absent"), &Manifest::new()).unwrap();
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "old.txt", b"x");

        let report = Pruner::new(dir.path())
            .dry_run(true)
            .prune(&Manifest::new())
            .unwrap();

        assert_eq!(report.removed, vec!["old.txt"]);
        assert!(dir.path().join("old.txt").exists());
    }

    #[test]
    fn test_prune_paths_with_precomputed_set() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "old.txt", b"x");
        write(dir.path(), "keep.txt", b"y");
        let orphans: BTreeSet<String> = ["old.txt".to_string(), "gone.txt".to_string()].into();

        let report = Pruner::new(dir.path()).prune_paths(&orphans).unwrap();

        assert_eq!(report.removed, vec!["old.txt"]);
        assert_eq!(report.already_gone, vec!["gone.txt"]);
        assert!(report.is_complete());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_orphans_are_not_reported_as_removed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt as _;

        let dir = TempDir::new().unwrap();
        let a = dir.path().join(OsStr::from_bytes(b"old\xff.dll"));
        let b = dir.path().join(OsStr::from_bytes(b"old\xfe.dll"));
        // Some filesystems refuse names that are not UTF-8.
        if fs::write(&a, b"a").is_err() || fs::write(&b, b"b").is_err() {
            return;
        }

        let err = prune_orphans(dir.path(), &Manifest::new()).unwrap_err();
        assert!(err.is_io(), "{err:?}");
        assert!(a.exists() && b.exists());

        // The lossy spelling names no file on disk.
        let lossy = vec!["old\u{FFFD}.dll".to_string()];
        let report = Pruner::new(dir.path()).prune_paths(&lossy).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.already_gone, lossy);
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn test_prune_paths_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let orphans = vec!["../outside.txt".to_string()];
        let err = Pruner::new(dir.path()).prune_paths(&orphans).unwrap_err();
        assert!(matches!(err, Error::PathEscapesRoot(_)));
    }

    #[test]
    fn test_empty_dirs_removed_when_enabled() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "mods/old/a.lua", b"x");
        write(dir.path(), "keep/b.txt", b"y");

        let manifest = manifest_for(&[("keep/b.txt", b"y")]);
        let report = Pruner::new(dir.path())
            .remove_empty_dirs(true)
            .prune(&manifest)
            .unwrap();

        assert_eq!(report.removed_dirs, vec!["mods/old", "mods"]);
        assert!(!dir.path().join("mods").exists());
        assert!(dir.path().join("keep").is_dir());
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_cancelled_prune_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "old.txt", b"x");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = Pruner::new(dir.path())
            .cancel_token(cancel)
            .prune(&Manifest::new())
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(dir.path().join("old.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_delete_is_reported_and_others_continue() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "locked/old.bin", b"x");
        write(dir.path(), "z_old.txt", b"y");
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Root can delete regardless of directory permissions.
        let canary = locked.join("canary");
        if fs::write(&canary, b"").is_ok() {
            let _ = fs::remove_file(&canary);
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let err = prune_orphans(dir.path(), &Manifest::new()).unwrap_err();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        match err {
            Error::PruneIncomplete { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, "locked/old.bin");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("z_old.txt").exists());
        assert!(dir.path().join("locked/old.bin").exists());
    }
}
