//! Installation inventory: walk the root and hash every regular file

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt as _, Result};
use crate::hash::{HashAlgorithm, hash_file};
use crate::path::to_manifest_key;

/// Upper bound for the default number of concurrent hash operations
pub const MAX_DEFAULT_CONCURRENCY: usize = 16;

/// Default worker count: host parallelism, clamped to `1..=MAX_DEFAULT_CONCURRENCY`
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        .clamp(1, MAX_DEFAULT_CONCURRENCY)
}

/// Observed state of one local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileRecord {
    /// Forward-slash path relative to the scan root
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Lowercase hex digest
    pub hash: String,
}

/// All regular files found under a root, keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    files: BTreeMap<String, LocalFileRecord>,
}

impl Inventory {
    /// Create an inventory from scanned records
    #[must_use]
    pub fn from_records(records: Vec<LocalFileRecord>) -> Self {
        let files = records.into_iter().map(|r| (r.path.clone(), r)).collect();
        Self { files }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&LocalFileRecord> {
        self.files.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Records in path order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalFileRecord)> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Sum of all file sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}

/// A regular file found by the walk, before hashing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPath {
    /// Manifest-style key
    pub relative: String,
    /// Location on disk
    pub absolute: PathBuf,
}

/// Scanner for an installation directory
///
/// Only regular files are reported. Directories, symlinks and special
/// files are skipped; links are never followed.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    algorithm: HashAlgorithm,
    concurrency: usize,
    cancel: CancelToken,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            algorithm: HashAlgorithm::default(),
            concurrency: default_concurrency(),
            cancel: CancelToken::new(),
        }
    }

    /// Digest algorithm to hash with
    #[must_use]
    pub fn algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Maximum number of files hashed at once (at least 1)
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Token checked before each file is hashed
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        // Every file under an install root counts, hidden or ignored alike.
        builder.standard_filters(false).follow_links(false);
        builder
    }

    /// Whether the root exists; a missing root means a fresh install
    fn root_present(&self) -> Result<bool> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(true),
            Ok(_) => Err(Error::Io {
                path: self.root.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    "install root is not a directory",
                ),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).at(&self.root),
        }
    }

    /// List every regular file without hashing, sorted by key
    ///
    /// # Errors
    /// Returns an error if directory traversal fails or the pass is cancelled.
    pub fn scan_paths(&self) -> Result<Vec<LocalPath>> {
        if !self.root_present()? {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for result in self.walk_builder().build() {
            self.cancel.check()?;
            let entry = result?;

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let absolute = entry.into_path();
            let Ok(relative) = absolute.strip_prefix(&self.root) else {
                continue;
            };
            let Some(key) = to_manifest_key(relative) else {
                return Err(Error::Io {
                    path: absolute,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "file name is not valid UTF-8",
                    ),
                });
            };
            paths.push(LocalPath {
                relative: key,
                absolute,
            });
        }

        paths.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(paths)
    }

    /// Scan the directory and hash every regular file
    ///
    /// Hashing fans out over a pool of `concurrency` workers. Any single
    /// hash failure aborts the whole scan.
    ///
    /// # Errors
    /// Returns an error if traversal or hashing fails, or if cancelled.
    pub fn scan(&self) -> Result<Inventory> {
        let paths = self.scan_paths()?;
        if paths.is_empty() {
            debug!(root = %self.root.display(), "nothing to hash");
            return Ok(Inventory::empty());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("clientsync-hash-{i}"))
            .build()?;

        let records: Vec<LocalFileRecord> = pool.install(|| {
            paths
                .par_iter()
                .map(|local| -> Result<LocalFileRecord> {
                    self.cancel.check()?;
                    let digest = hash_file(&local.absolute, self.algorithm)?;
                    debug!(path = %local.relative, size = digest.size, "hashed");
                    Ok(LocalFileRecord {
                        path: local.relative.clone(),
                        size: digest.size,
                        hash: digest.hash,
                    })
                })
                .collect::<Result<_>>()
        })?;

        let inventory = Inventory::from_records(records);
        info!(
            root = %self.root.display(),
            files = inventory.len(),
            bytes = inventory.total_size(),
            "inventory complete"
        );
        Ok(inventory)
    }
}

/// Inventory of `root` with the default algorithm and concurrency
///
/// A missing root yields an empty inventory.
///
/// # Errors
/// Returns an error if traversal or any single hash fails.
pub fn get_local_inventory(root: impl Into<PathBuf>) -> Result<Inventory> {
    Scanner::new(root).scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let inventory = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(inventory.len(), 2);
        let record = inventory.get("file1.txt").unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.hash, hash_bytes(b"hello", HashAlgorithm::Blake3).hash);
    }

    #[test]
    fn test_scan_nested_directories_use_forward_slashes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/dir")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/dir/deep.txt"), "deep").unwrap();
        fs::create_dir_all(dir.path().join("empty/dir")).unwrap();

        let inventory = Scanner::new(dir.path()).concurrency(2).scan().unwrap();

        let paths: Vec<_> = inventory.paths().cloned().collect();
        assert_eq!(paths, vec!["root.txt", "sub/dir/deep.txt", "sub/nested.txt"]);
    }

    #[test]
    fn test_scan_includes_hidden_and_gitignored_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("client.log"), "log").unwrap();
        fs::write(dir.path().join(".hidden"), "h").unwrap();

        let inventory = Scanner::new(dir.path()).scan().unwrap();

        assert!(inventory.contains("client.log"));
        assert!(inventory.contains(".hidden"));
        assert!(inventory.contains(".gitignore"));
    }

    #[test]
    fn test_missing_root_is_empty_inventory() {
        let dir = TempDir::new().unwrap();
        let inventory = Scanner::new(dir.path().join("otclient")).scan().unwrap();
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_root_that_is_a_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(Scanner::new(&file).scan().unwrap_err().is_io());
    }

    #[test]
    fn test_md5_scan_matches_legacy_digest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let inventory = Scanner::new(dir.path())
            .algorithm(HashAlgorithm::Md5)
            .scan()
            .unwrap();

        assert_eq!(
            inventory.get("a.txt").unwrap().hash,
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_cancelled_scan_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = Scanner::new(dir.path())
            .cancel_token(cancel)
            .scan()
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let inventory = Scanner::new(dir.path()).scan().unwrap();
        assert!(inventory.contains("real.txt"));
        assert!(!inventory.contains("link.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_abort_scan() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt as _;

        let dir = TempDir::new().unwrap();
        // Some filesystems refuse names that are not UTF-8.
        if fs::write(dir.path().join(OsStr::from_bytes(b"old\xff.dll")), "a").is_err()
            || fs::write(dir.path().join(OsStr::from_bytes(b"old\xfe.dll")), "b").is_err()
        {
            return;
        }

        let err = Scanner::new(dir.path()).scan().unwrap_err();
        match err {
            Error::Io { path, source } => {
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
                assert!(path.starts_with(dir.path()));
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_aborts_scan() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked.bin");
        fs::write(&locked, "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores permission bits; nothing to assert there.
        if fs::File::open(&locked).is_ok() {
            return;
        }

        let err = Scanner::new(dir.path()).scan().unwrap_err();
        assert!(err.is_io(), "{err:?}");
    }
}
