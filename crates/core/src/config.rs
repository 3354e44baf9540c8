//! Launcher configuration file parsing (clientsync.toml)
//!
//! The reconciliation core never reads this on its own; callers load it and
//! pass the relevant values down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt as _, Result};
use crate::hash::HashAlgorithm;
use crate::path::resolve_under;
use crate::scan::default_concurrency;
use crate::writer::FileWriter;

/// Config file name
pub const CONFIG_FILE: &str = "clientsync.toml";

/// Launcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Installation root, relative paths are taken from the config's directory
    pub install_dir: PathBuf,

    /// Digest algorithm; inferred from the manifest when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Concurrent hash/fetch workers
    pub concurrency: usize,

    /// Remove directories that pruning leaves empty
    pub prune_empty_dirs: bool,

    /// Client display name -> executable path inside the install dir
    pub clients: BTreeMap<String, String>,

    pub preferences: Preferences,
}

/// User-facing launcher preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub selected_client: String,
    pub auto_play: bool,
    pub close_on_launch: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            selected_client: "64-bit OpenGL".to_string(),
            auto_play: false,
            close_on_launch: false,
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("otclient"),
            hash_algorithm: None,
            concurrency: default_concurrency(),
            prune_empty_dirs: false,
            clients: BTreeMap::new(),
            preferences: Preferences::default(),
        }
    }
}

impl LauncherConfig {
    /// Load config from a file.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).at(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.concurrency = config.concurrency.max(1);
        Ok(config)
    }

    /// Persist config atomically
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        let (dir, name) = split_file_path(path)?;
        FileWriter::new(dir).write(&name, content.as_bytes())?;
        Ok(())
    }

    /// Install root, resolving a relative `install_dir` against `base`
    #[must_use]
    pub fn install_root(&self, base: &Path) -> PathBuf {
        if self.install_dir.is_absolute() {
            self.install_dir.clone()
        } else {
            base.join(&self.install_dir)
        }
    }

    /// Executable of the selected client, confined to the install root
    ///
    /// # Errors
    /// Returns `Error::UnknownClient` when the selected client is not
    /// configured, or `Error::PathEscapesRoot` for a path outside the root.
    pub fn selected_client_path(&self, base: &Path) -> Result<PathBuf> {
        let name = &self.preferences.selected_client;
        let relative = self
            .clients
            .get(name)
            .ok_or_else(|| Error::UnknownClient(name.clone()))?;
        resolve_under(&self.install_root(base), relative)
    }
}

fn split_file_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "config path has no UTF-8 file name",
            ),
        })?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
install_dir = "/games/otclient"
hash_algorithm = "md5"
concurrency = 4
prune_empty_dirs = true

[clients]
"64-bit OpenGL" = "bin/otclient_gl.exe"
"64-bit DirectX" = "bin/otclient_dx.exe"

[preferences]
selected_client = "64-bit DirectX"
auto_play = true
"#;

        let config: LauncherConfig = toml::from_str(text).unwrap();
        assert_eq!(config.install_dir, PathBuf::from("/games/otclient"));
        assert_eq!(config.hash_algorithm, Some(HashAlgorithm::Md5));
        assert_eq!(config.concurrency, 4);
        assert!(config.prune_empty_dirs);
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.preferences.selected_client, "64-bit DirectX");
        assert!(config.preferences.auto_play);
        assert!(!config.preferences.close_on_launch);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: LauncherConfig = toml::from_str("").unwrap();
        assert_eq!(config.install_dir, PathBuf::from("otclient"));
        assert_eq!(config.hash_algorithm, None);
        assert_eq!(config.preferences.selected_client, "64-bit OpenGL");
        assert!(config.concurrency >= 1);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, LauncherConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "concurrency = \"many\"").unwrap();
        assert!(matches!(
            LauncherConfig::load(&path).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = LauncherConfig::default();
        config.preferences.close_on_launch = true;
        config
            .clients
            .insert("64-bit OpenGL".into(), "otclient_gl".into());
        config.save(&path).unwrap();

        assert_eq!(LauncherConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_selected_client_path() {
        let mut config = LauncherConfig::default();
        config
            .clients
            .insert("64-bit OpenGL".into(), "bin/otclient_gl".into());

        let base = Path::new("/launcher");
        assert_eq!(
            config.selected_client_path(base).unwrap(),
            base.join("otclient").join("bin").join("otclient_gl")
        );

        config.preferences.selected_client = "unknown".into();
        assert!(matches!(
            config.selected_client_path(base),
            Err(Error::UnknownClient(_))
        ));
    }

    #[test]
    fn test_selected_client_cannot_escape_install_dir() {
        let mut config = LauncherConfig::default();
        config
            .clients
            .insert("64-bit OpenGL".into(), "../../bin/sh".into());
        assert!(matches!(
            config.selected_client_path(Path::new("/launcher")),
            Err(Error::PathEscapesRoot(_))
        ));
    }
}
