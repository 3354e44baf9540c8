//! The authoritative file list for an installation
//!
//! Serialized as a JSON object keyed by relative path:
//!
//! ```json
//! { "data/things.dat": { "size": 1024, "hash": "5d41402abc4b2a76b9719d911017c592" } }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt as _, Result};
use crate::hash::HashAlgorithm;
use crate::path::validate_relative;
use crate::scan::Inventory;

/// Expected size and digest of one file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub size: u64,
    /// Lowercase hex digest
    pub hash: String,
}

impl ManifestEntry {
    /// Create an entry, normalizing the hash to lowercase
    #[must_use]
    pub fn new(size: u64, hash: impl Into<String>) -> Self {
        Self {
            size,
            hash: hash.into().to_ascii_lowercase(),
        }
    }
}

/// Wire shape before validation; both fields are required but checked by hand
/// so a missing one is reported as `InvalidManifest` with its path.
#[derive(Deserialize)]
struct RawEntry {
    size: Option<u64>,
    hash: Option<String>,
}

/// Top-level object in document order, duplicates kept so they can be rejected
struct RawManifest(Vec<(String, RawEntry)>);

impl<'de> Deserialize<'de> for RawManifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawManifest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping relative paths to {size, hash}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawManifest, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, RawEntry>()? {
                    entries.push(entry);
                }
                Ok(RawManifest(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Mapping from relative path to expected entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a manifest from JSON
    ///
    /// # Errors
    /// Returns `Error::Json` for malformed JSON and `Error::InvalidManifest`
    /// for an entry with a bad path, a path listed twice, or a
    /// missing/invalid `size` or `hash`.
    pub fn from_json(json: &str) -> Result<Self> {
        let RawManifest(raw) = serde_json::from_str(json)?;
        let mut manifest = Self::new();
        for (path, entry) in raw {
            if manifest.contains(&path) {
                return Err(Error::invalid_manifest(&path, "path listed more than once"));
            }
            let size = entry
                .size
                .ok_or_else(|| Error::invalid_manifest(&path, "missing size field"))?;
            let hash = entry
                .hash
                .ok_or_else(|| Error::invalid_manifest(&path, "missing hash field"))?;
            manifest.insert(path, ManifestEntry::new(size, hash))?;
        }
        Ok(manifest)
    }

    /// Load a manifest file from disk
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, otherwise as
    /// [`Manifest::from_json`].
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).at(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON with sorted keys
    ///
    /// # Errors
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build a manifest describing exactly what an inventory holds
    #[must_use]
    pub fn from_inventory(inventory: &Inventory) -> Self {
        let entries = inventory
            .iter()
            .map(|(path, record)| (path.clone(), ManifestEntry::new(record.size, &record.hash)))
            .collect();
        Self { entries }
    }

    /// Add or replace an entry
    ///
    /// # Errors
    /// Returns `Error::InvalidManifest` if the path or hash is malformed.
    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) -> Result<()> {
        let path = path.into();
        validate_relative(&path).map_err(|reason| Error::invalid_manifest(&path, reason))?;
        if entry.hash.is_empty() || !entry.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_manifest(&path, "hash must be a hex string"));
        }
        let entry = ManifestEntry::new(entry.size, entry.hash);
        self.entries.insert(path, entry);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Sum of all expected file sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Guess the digest algorithm from the hash lengths
    ///
    /// Returns `None` for an empty manifest or when entries disagree.
    #[must_use]
    pub fn infer_algorithm(&self) -> Option<HashAlgorithm> {
        let mut hashes = self.entries.values().map(|e| e.hash.as_str());
        let first = HashAlgorithm::infer_from_hex(hashes.next()?)?;
        hashes
            .all(|h| HashAlgorithm::infer_from_hex(h) == Some(first))
            .then_some(first)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a String, &'a ManifestEntry);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
