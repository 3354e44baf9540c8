//! Relative-path normalization and root confinement
//!
//! Manifest paths are forward-slash separated, relative, and never contain
//! `.`/`..` segments. Everything that joins such a path onto the install
//! root goes through [`resolve_under`].

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Check that `path` is a well-formed manifest path
///
/// # Errors
/// Returns a human-readable reason when it is not.
pub fn validate_relative(path: &str) -> std::result::Result<(), &'static str> {
    if path.is_empty() {
        return Err("path is empty");
    }
    if path.starts_with('/') {
        return Err("path must not start with '/'");
    }
    if path.contains('\\') {
        return Err("path must use '/' separators");
    }
    if path.contains('\0') {
        return Err("path contains a NUL byte");
    }
    // Drive prefixes such as `C:` would make the join absolute on Windows.
    if path.split('/').next().is_some_and(|first| first.contains(':')) {
        return Err("path must not carry a drive prefix");
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err("path contains an empty segment"),
            "." | ".." => return Err("path contains a '.' or '..' segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Turn a path relative to the root into its manifest key
///
/// Returns `None` when any component is not valid UTF-8, since no manifest
/// key can name such a file and a lossy key would alias other files.
#[must_use]
pub fn to_manifest_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    Some(parts.join("/"))
}

/// Resolve a manifest path to a location inside `root`
///
/// Rejects traversal outright, then makes sure no already-existing
/// directory along the way is a link pointing out of the root.
///
/// # Errors
/// Returns `Error::PathEscapesRoot` for any path that would land outside.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    validate_relative(relative).map_err(|_| Error::PathEscapesRoot(relative.to_string()))?;

    let mut resolved = root.to_path_buf();
    for segment in relative.split('/') {
        resolved.push(segment);
    }

    let Ok(canonical_root) = root.canonicalize() else {
        // Nothing exists yet, so nothing can redirect the join.
        return Ok(resolved);
    };

    let mut probe = resolved.parent();
    while let Some(dir) = probe {
        if let Ok(canonical) = dir.canonicalize() {
            if !canonical.starts_with(&canonical_root) {
                return Err(Error::PathEscapesRoot(relative.to_string()));
            }
            break;
        }
        probe = dir.parent();
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_nested_paths() {
        assert!(validate_relative("a.txt").is_ok());
        assert!(validate_relative("data/things/sprites.spr").is_ok());
        assert!(validate_relative(".hidden/config").is_ok());
    }

    #[test]
    fn test_validate_rejects_traversal_and_absolute() {
        for bad in [
            "",
            "/etc/passwd",
            "../evil.txt",
            "a/../../b",
            "a/./b",
            "a//b",
            "a\\b",
            "C:/Windows/evil.dll",
            "trailing/",
        ] {
            assert!(validate_relative(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_manifest_key_uses_forward_slashes() {
        let rel = Path::new("sub").join("dir").join("file.bin");
        assert_eq!(to_manifest_key(&rel).as_deref(), Some("sub/dir/file.bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_manifest_key_rejects_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt as _;

        let rel = Path::new("sub").join(OsStr::from_bytes(b"old\xff.dll"));
        assert_eq!(to_manifest_key(&rel), None);
    }

    #[test]
    fn test_resolve_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_under(dir.path(), "deep/nested/file.bin").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with(Path::new("deep").join("nested").join("file.bin")));
    }

    #[test]
    fn test_resolve_rejects_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_under(dir.path(), "../outside.txt").unwrap_err();
        assert!(matches!(err, Error::PathEscapesRoot(_)));
    }

    #[test]
    fn test_resolve_without_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-yet-installed");
        let path = resolve_under(&root, "a/b.txt").unwrap();
        assert_eq!(path, root.join("a").join("b.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlinked_directory_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = resolve_under(root.path(), "link/payload.bin").unwrap_err();
        assert!(matches!(err, Error::PathEscapesRoot(_)));
    }
}
