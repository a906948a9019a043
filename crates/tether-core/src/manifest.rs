//! Manifest formats.
//!
//! Three remote document shapes are understood:
//!
//! - [`AppManifest`]: the application payload, an ordered file list with
//!   SHA-256 hashes, the entry point, launch arguments and the runtime
//!   component it needs.
//! - [`RuntimeIndex`]: platform → component → version entries, each
//!   pointing at a per-version [`RuntimeFileManifest`].
//! - [`RuntimeFileManifest`]: path → file entry with legacy SHA-1 hashes.
//!
//! A fourth shape, [`ExecutableManifest`], describes a single
//! self-updating executable.
//!
//! Every file-tree shape converts into the canonical [`FileManifest`],
//! which is what the reconciliation engine consumes. A `FileManifest`
//! defines the *entire* legitimate content of its base directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::BootstrapError;
use crate::hash::HashAlgorithm;

/// Kind of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Regular file to download.
    File,
    /// Directory to create.
    Directory,
    /// Regular file that is also part of the launch classpath.
    Classpath,
    /// Symbolic link; declared but never downloaded.
    Link,
    /// Any other entry type; declared but not managed.
    #[serde(other)]
    Other,
}

impl FileKind {
    /// Whether entries of this kind are downloaded and hash-checked.
    pub fn is_downloadable(self) -> bool {
        matches!(self, Self::File | Self::Classpath)
    }
}

/// A single canonical entry of a [`FileManifest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Path relative to the manifest's base directory, `/`-separated.
    pub relative_path: String,
    pub kind: FileKind,
    /// Declared content hash (lowercase hex). Empty for directories.
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub url: String,
    pub executable: bool,
}

/// Canonical file set of a base directory, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    files: BTreeMap<String, FileDescriptor>,
}

impl FileManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from descriptors, validating each one.
    pub fn from_descriptors<I>(descriptors: I) -> Result<Self, BootstrapError>
    where
        I: IntoIterator<Item = FileDescriptor>,
    {
        let mut manifest = Self::new();
        for descriptor in descriptors {
            manifest.insert(descriptor)?;
        }
        Ok(manifest)
    }

    /// Add a descriptor, rejecting paths that would escape the base directory.
    pub fn insert(&mut self, descriptor: FileDescriptor) -> Result<(), BootstrapError> {
        validate_relative_path(&descriptor.relative_path)?;
        if descriptor.kind.is_downloadable() && descriptor.url.is_empty() {
            return Err(BootstrapError::InvalidManifest(format!(
                "file {} has no download url",
                descriptor.relative_path
            )));
        }
        self.files
            .insert(descriptor.relative_path.clone(), descriptor);
        Ok(())
    }

    /// Look up a descriptor by relative path.
    pub fn get(&self, relative_path: &str) -> Option<&FileDescriptor> {
        self.files.get(relative_path)
    }

    /// Iterate descriptors in path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.values()
    }

    /// Number of declared entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest declares nothing.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute paths of every declared entry under `base`.
    pub fn declared_paths(&self, base: &Path) -> HashSet<PathBuf> {
        self.files.keys().map(|rel| base.join(rel)).collect()
    }
}

/// Reject absolute paths and paths containing `..`.
fn validate_relative_path(path: &str) -> Result<(), BootstrapError> {
    if path.is_empty() {
        return Err(BootstrapError::InvalidManifest("empty file path".to_string()));
    }

    let escapes = path.starts_with('/')
        || path.starts_with('\\')
        || Path::new(path).components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });

    if escapes {
        return Err(BootstrapError::InvalidManifest(format!(
            "file path {path} escapes the installation directory"
        )));
    }
    Ok(())
}

// =============================================================================
// Application manifest
// =============================================================================

/// Top-level application manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    /// Application version
    pub version: String,
    /// Ordered file list
    #[serde(default)]
    pub files: Vec<AppFileEntry>,
    /// Entry point passed to the runtime
    pub main_class: String,
    /// Launch arguments, with `${...}` placeholders
    #[serde(default)]
    pub args: Vec<String>,
    /// Runtime component the application needs
    #[serde(rename = "jre")]
    pub runtime: RuntimeSpec,
}

/// A file entry of the application manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppFileEntry {
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub path: String,
    /// SHA-256 of the content
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

/// Runtime component requirement embedded in the application manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// URL of the runtime index manifest
    #[serde(rename = "manifest")]
    pub index_url: String,
    /// Primary component name
    pub component: String,
    /// Legacy component kept alongside the primary one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_legacy: Option<String>,
}

impl RuntimeSpec {
    /// Component names to look up, primary first.
    pub fn candidates(&self) -> Vec<&str> {
        std::iter::once(self.component.as_str())
            .chain(self.component_legacy.as_deref())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

impl AppManifest {
    /// Canonical file set of the application directory.
    pub fn file_manifest(&self) -> Result<FileManifest, BootstrapError> {
        FileManifest::from_descriptors(self.files.iter().map(|entry| FileDescriptor {
            relative_path: entry.path.clone(),
            kind: entry.kind,
            hash: entry.hash.to_ascii_lowercase(),
            algorithm: HashAlgorithm::Sha256,
            size: entry.size,
            url: entry.url.clone(),
            executable: false,
        }))
    }
}

// =============================================================================
// Runtime manifests
// =============================================================================

/// Runtime index: platform key → component name → version entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeIndex(pub BTreeMap<String, BTreeMap<String, Vec<RuntimeVersionEntry>>>);

impl RuntimeIndex {
    /// Components published for a platform.
    pub fn platform(&self, key: &str) -> Option<&BTreeMap<String, Vec<RuntimeVersionEntry>>> {
        self.0.get(key)
    }
}

/// One published version of a runtime component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeVersionEntry {
    #[serde(default)]
    pub availability: Availability,
    /// Where the per-version file manifest lives
    pub manifest: RemoteFile,
    #[serde(default)]
    pub version: VersionInfo,
}

/// Rollout information attached to a runtime version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default)]
    pub group: u32,
    #[serde(default)]
    pub progress: u32,
}

/// Human-readable version information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub name: String,
    /// RFC 3339 release timestamp, kept verbatim
    #[serde(default)]
    pub released: String,
}

impl VersionInfo {
    /// Parsed release timestamp, if the publisher supplied a valid one.
    pub fn released_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.released).ok()
    }
}

/// A downloadable object described by SHA-1, size and URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub sha1: String,
    #[serde(default)]
    pub size: u64,
    pub url: String,
}

/// Per-version runtime file manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeFileManifest {
    pub files: BTreeMap<String, RuntimeFileEntry>,
}

/// A file entry of a runtime manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeFileEntry {
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default)]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<RuntimeDownloads>,
    /// Link target for `link` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Download variants of a runtime file. Only `raw` is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDownloads {
    pub raw: RemoteFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lzma: Option<RemoteFile>,
}

impl RuntimeFileManifest {
    /// Canonical file set of a runtime component directory.
    pub fn file_manifest(&self) -> Result<FileManifest, BootstrapError> {
        let mut manifest = FileManifest::new();

        for (path, entry) in &self.files {
            let descriptor = match (&entry.downloads, entry.kind.is_downloadable()) {
                (Some(downloads), true) => FileDescriptor {
                    relative_path: path.clone(),
                    kind: entry.kind,
                    hash: downloads.raw.sha1.to_ascii_lowercase(),
                    algorithm: HashAlgorithm::Sha1,
                    size: downloads.raw.size,
                    url: downloads.raw.url.clone(),
                    executable: entry.executable,
                },
                (None, true) => {
                    return Err(BootstrapError::InvalidManifest(format!(
                        "runtime file {path} has no raw download"
                    )));
                }
                (_, false) => FileDescriptor {
                    relative_path: path.clone(),
                    kind: entry.kind,
                    hash: String::new(),
                    algorithm: HashAlgorithm::Sha1,
                    size: 0,
                    url: String::new(),
                    executable: false,
                },
            };
            manifest.insert(descriptor)?;
        }

        Ok(manifest)
    }
}

// =============================================================================
// Executable manifest
// =============================================================================

/// Manifest of a single self-updating executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableManifest {
    /// Semantic version of the published executable
    pub version: String,
    pub url: String,
    /// SHA-256 of the executable
    pub hash: String,
    /// Size in bytes, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Launch arguments, with `${...}` placeholders
    #[serde(default)]
    pub args: Vec<String>,
}
