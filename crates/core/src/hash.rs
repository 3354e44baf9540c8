//! Streaming content digests (size + hex hash)

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Digest as _;
use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt as _, Result};

/// Read buffer size; peak memory per hash does not grow with file size
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithm used for file identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 128-bit MD5, the format of legacy launcher manifests
    Md5,
    /// 256-bit BLAKE3
    #[default]
    Blake3,
}

impl HashAlgorithm {
    /// Length of a digest in lowercase hex characters
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Blake3 => 64,
        }
    }

    /// Guess the algorithm that produced a hex digest from its length
    #[must_use]
    pub fn infer_from_hex(hash: &str) -> Option<Self> {
        match hash.len() {
            32 => Some(Self::Md5),
            64 => Some(Self::Blake3),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Blake3 => f.write_str("blake3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!("unknown hash algorithm {other:?} (expected md5 or blake3)")),
        }
    }
}

/// Byte size and lowercase hex digest of some content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDigest {
    pub size: u64,
    pub hash: String,
}

enum State {
    Md5(md5::Md5),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hasher that also counts bytes
pub struct StreamHasher {
    state: State,
    size: u64,
}

impl StreamHasher {
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => State::Md5(md5::Md5::new()),
            HashAlgorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { state, size: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Md5(h) => h.update(data),
            State::Blake3(h) => {
                h.update(data);
            }
        }
        self.size += data.len() as u64;
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn finalize(self) -> FileDigest {
        let hash = match self.state {
            State::Md5(h) => hex::encode(h.finalize()),
            State::Blake3(h) => h.finalize().to_hex().to_string(),
        };
        FileDigest {
            size: self.size,
            hash,
        }
    }
}

/// Hash everything a reader yields, in `CHUNK_SIZE` pieces
///
/// # Errors
/// Returns the reader's error; no digest is produced for a partial read.
pub fn hash_reader<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> io::Result<FileDigest> {
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
    }

    Ok(hasher.finalize())
}

/// Hash a file by path
///
/// # Errors
/// Returns `Error::Io` if the file cannot be opened or fully read
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<FileDigest> {
    let file = std::fs::File::open(path).at(path)?;
    hash_reader(file, algorithm).at(path)
}

/// Hash an in-memory payload
#[must_use]
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> FileDigest {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}
