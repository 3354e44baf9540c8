//! All-or-nothing file materialization under the install root
//!
//! Payloads go to a temp file in the target's directory, are flushed to
//! disk, then renamed over the target and the directory entry is synced.
//! Readers see either the old file or the complete new one; concurrent
//! writers to one path are last-writer-wins. Directories created for a
//! write that then fails are removed again.

use std::fs;
use std::io::{self, Read, Write as _};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, IoResultExt as _, Result};
use crate::hash::{CHUNK_SIZE, FileDigest, HashAlgorithm, StreamHasher};
use crate::manifest::ManifestEntry;
use crate::path::resolve_under;

/// Prefix of in-flight temp files; leftovers from a crash show up as orphans
pub const TEMP_PREFIX: &str = ".clientsync-";

/// Writes files below one installation root
#[derive(Debug, Clone)]
pub struct FileWriter {
    root: PathBuf,
    algorithm: HashAlgorithm,
}

impl FileWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            algorithm: HashAlgorithm::default(),
        }
    }

    /// Digest algorithm used for verified writes
    #[must_use]
    pub fn algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the file at `relative` with `data`
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    /// Returns `Error::PathEscapesRoot` for a path outside the root and
    /// `Error::Io` if any filesystem step fails.
    pub fn write(&self, relative: &str, data: &[u8]) -> Result<PathBuf> {
        let (target, digest) = self.commit(relative, data, None)?;
        debug!(path = relative, size = digest.size, "wrote file");
        Ok(target)
    }

    /// Like [`FileWriter::write`], but refuses content that does not match `expected`
    ///
    /// On mismatch the existing file is left untouched.
    ///
    /// # Errors
    /// Returns `Error::IntegrityMismatch` when size or hash disagree.
    pub fn write_verified(
        &self,
        relative: &str,
        expected: &ManifestEntry,
        data: &[u8],
    ) -> Result<PathBuf> {
        let (target, _) = self.commit(relative, data, Some(expected))?;
        debug!(path = relative, size = expected.size, "wrote verified file");
        Ok(target)
    }

    /// Stream a reader into `relative`, hashing on the way
    ///
    /// # Errors
    /// As [`FileWriter::write_verified`] when `expected` is given, otherwise
    /// as [`FileWriter::write`].
    pub fn write_stream<R: Read>(
        &self,
        relative: &str,
        reader: R,
        expected: Option<&ManifestEntry>,
    ) -> Result<FileDigest> {
        let (_, digest) = self.commit(relative, reader, expected)?;
        debug!(path = relative, size = digest.size, "streamed file");
        Ok(digest)
    }

    fn commit<R: Read>(
        &self,
        relative: &str,
        reader: R,
        expected: Option<&ManifestEntry>,
    ) -> Result<(PathBuf, FileDigest)> {
        let target = resolve_under(&self.root, relative)?;
        let parent = target
            .parent()
            .ok_or_else(|| Error::PathEscapesRoot(relative.to_string()))?;
        let created = first_missing_ancestor(parent);
        fs::create_dir_all(parent).at(parent)?;

        let result = self.replace(parent, &target, relative, reader, expected);
        if result.is_err() {
            if let Some(top) = created {
                remove_created_dirs(parent, &top);
            }
        }
        result.map(|digest| (target, digest))
    }

    fn replace<R: Read>(
        &self,
        parent: &Path,
        target: &Path,
        relative: &str,
        mut reader: R,
        expected: Option<&ManifestEntry>,
    ) -> Result<FileDigest> {
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".part")
            .tempfile_in(parent)
            .at(parent)?;

        let digest = copy_hashing(&mut reader, temp.as_file_mut(), self.algorithm).at(target)?;

        if let Some(expected) = expected {
            if digest.size != expected.size || digest.hash != expected.hash {
                return Err(Error::IntegrityMismatch {
                    path: relative.to_string(),
                    expected_size: expected.size,
                    expected_hash: expected.hash.clone(),
                    actual_size: digest.size,
                    actual_hash: digest.hash,
                });
            }
        }

        apply_permissions(&temp, target).at(target)?;
        temp.as_file().sync_all().at(target)?;
        persist(temp, target)?;
        sync_dir(parent).at(parent)?;

        Ok(digest)
    }
}

/// Topmost directory `create_dir_all(dir)` is about to create, if any
fn first_missing_ancestor(dir: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in dir.ancestors() {
        if fs::symlink_metadata(ancestor).is_ok() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

/// Remove `dir` and its parents up to and including `top` while they are empty
fn remove_created_dirs(dir: &Path, top: &Path) {
    for ancestor in dir.ancestors() {
        if fs::remove_dir(ancestor).is_err() || ancestor == top {
            break;
        }
    }
}

/// Make a rename in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn copy_hashing<R: Read>(
    reader: &mut R,
    out: &mut fs::File,
    algorithm: HashAlgorithm,
) -> io::Result<FileDigest> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        out.write_all(&buffer[..bytes_read])?;
    }
    out.flush()?;

    Ok(hasher.finalize())
}

/// Keep the mode of a file being replaced; new files get the usual 0644
fn apply_permissions(temp: &NamedTempFile, target: &Path) -> io::Result<()> {
    let permissions = match fs::metadata(target) {
        Ok(meta) if meta.is_file() => meta.permissions(),
        _ => default_permissions(temp)?,
    };
    temp.as_file().set_permissions(permissions)
}

#[cfg(unix)]
fn default_permissions(_temp: &NamedTempFile) -> io::Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt as _;
    Ok(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions(temp: &NamedTempFile) -> io::Result<fs::Permissions> {
    Ok(temp.as_file().metadata()?.permissions())
}

fn persist(temp: NamedTempFile, target: &Path) -> Result<()> {
    match temp.persist(target) {
        Ok(_) => Ok(()),
        // A directory squatting on the target path must not be replaced.
        Err(e) => Err(e.error).at(target),
    }
}

/// Write `data` to `relative` under `root`
///
/// # Errors
/// See [`FileWriter::write`].
pub fn write_file(root: &Path, relative: &str, data: &[u8]) -> Result<PathBuf> {
    FileWriter::new(root).write(relative, data)
}
