//! Content hashing.
//!
//! Manifest families declare file hashes with different algorithms: the
//! application payload uses SHA-256, while runtime-component manifests
//! carry legacy SHA-1 digests. Everything that compares local content to a
//! manifest goes through [`HashAlgorithm`] so no caller is tied to one
//! digest.
//!
//! Hashes are lowercase hex strings. Comparison against a declared hash is
//! case-insensitive and constant-time.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::BootstrapError;

/// Buffer size for reading files during hash computation (64KB).
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm a manifest declares its hashes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Legacy digest used by runtime-component manifests.
    Sha1,
    /// Digest used by application and executable manifests.
    Sha256,
}

impl HashAlgorithm {
    /// Start an incremental hasher for this algorithm.
    pub fn hasher(self) -> ContentHasher {
        match self {
            Self::Sha1 => ContentHasher::Sha1(Sha1::new()),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    /// Hash an in-memory buffer.
    pub fn digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Incremental hasher over one of the supported algorithms.
///
/// Used by the download path to hash bytes as they are streamed to disk.
pub enum ContentHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ContentHasher {
    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finish the digest and return it as lowercase hex.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute the hash of a file, reading it in chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String, BootstrapError> {
    let mut file = File::open(path)?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// Compare two hex digests in constant time, ignoring case.
pub fn hashes_equal(actual: &str, expected: &str) -> bool {
    let actual = actual.to_ascii_lowercase();
    let expected = expected.to_ascii_lowercase();
    actual.len() == expected.len() && actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Check whether a file on disk has the expected content hash.
///
/// Returns `Ok(false)` when the file does not exist; any other I/O failure
/// is propagated.
pub fn file_matches(
    path: &Path,
    algorithm: HashAlgorithm,
    expected: &str,
) -> Result<bool, BootstrapError> {
    match hash_file(path, algorithm) {
        Ok(actual) => Ok(hashes_equal(&actual, expected)),
        Err(BootstrapError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
