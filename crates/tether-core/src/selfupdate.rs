//! Single self-updating executable.
//!
//! Instead of a file tree, the payload is one executable described by an
//! [`ExecutableManifest`]. Next to it lives an [`InstalledVersionRecord`]
//! (`<payload>.version.json`) written only after a verified download.
//! [`decide`] compares the record with the published version.
//!
//! Two hash mismatches are told apart. A pre-existing payload that does
//! not match its record is a stale install and is downloaded again once.
//! A payload that does not match right after downloading it is
//! [`BootstrapError::CorruptDownload`] and ends the run.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ManifestCache, CACHE_DIR};
use crate::download::{discard, fetch_to_file, part_path};
use crate::error::BootstrapError;
use crate::hash::{self, HashAlgorithm};
use crate::http::HttpClient;
use crate::manifest::ExecutableManifest;
use crate::progress::{spawn_aggregator, ProgressEvent, ProgressSink};
use crate::reconcile::set_executable;

/// Version recorded before the payload has ever been installed.
pub const NOT_DOWNLOADED: &str = "NOT_DOWNLOADED";

/// Cache file name of the executable manifest.
const MANIFEST_CACHE_FILE: &str = "executable_manifest.json";

/// Version and content hash of the installed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersionRecord {
    pub version: String,
    pub hash: String,
}

impl Default for InstalledVersionRecord {
    fn default() -> Self {
        Self {
            version: NOT_DOWNLOADED.to_string(),
            hash: String::new(),
        }
    }
}

impl InstalledVersionRecord {
    /// Whether a payload has been installed.
    pub fn is_installed(&self) -> bool {
        self.version != NOT_DOWNLOADED
    }

    /// `<payload>.version.json`
    pub fn path_for(payload: &Path) -> PathBuf {
        let mut name = OsString::from(payload.as_os_str());
        name.push(".version.json");
        PathBuf::from(name)
    }

    /// Load the record of `payload`.
    ///
    /// A missing or unparsable record yields the "not downloaded" record.
    pub fn load(payload: &Path) -> Result<Self, BootstrapError> {
        let path = Self::path_for(payload);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&data) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Version record is corrupt, ignoring it");
                Ok(Self::default())
            }
        }
    }

    /// Persist the record next to `payload`.
    pub fn save(&self, payload: &Path) -> Result<(), BootstrapError> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(Self::path_for(payload), data)?;
        Ok(())
    }
}

/// Outcome of the version gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Update,
    RunExisting,
}

/// Decide whether the installed payload must be replaced.
///
/// Updates when nothing is installed, when either version is not valid
/// semver, or when the installed version is strictly older.
pub fn decide(installed: &InstalledVersionRecord, remote_version: &str) -> GateDecision {
    if !installed.is_installed() {
        return GateDecision::Update;
    }

    let (Ok(local), Ok(remote)) = (
        Version::parse(installed.version.trim()),
        Version::parse(remote_version.trim()),
    ) else {
        debug!(
            installed = %installed.version,
            remote = remote_version,
            "Unparsable version, updating"
        );
        return GateDecision::Update;
    };

    if local < remote {
        GateDecision::Update
    } else {
        GateDecision::RunExisting
    }
}

/// Result of a self-update run.
#[derive(Debug, Clone)]
pub struct SelfUpdateOutcome {
    pub payload: PathBuf,
    pub manifest: ExecutableManifest,
    /// Whether a new payload was downloaded
    pub updated: bool,
}

/// Keeps a single executable payload current.
pub struct SelfUpdater {
    cache: ManifestCache,
    client: HttpClient,
    install_root: PathBuf,
    payload: PathBuf,
}

impl SelfUpdater {
    pub fn new(
        cache: ManifestCache,
        client: HttpClient,
        install_root: PathBuf,
        payload: PathBuf,
    ) -> Self {
        Self {
            cache,
            client,
            install_root,
            payload,
        }
    }

    /// Fetch the manifest, gate on version and replace the payload if needed.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::CorruptDownload`] if a fresh download does not
    ///   match the published hash. Any installed payload and its record
    ///   are left as they were.
    /// - [`BootstrapError::Cancelled`] if `cancel` fires mid-transfer.
    /// - Manifest and transport errors.
    pub async fn run(
        &self,
        manifest_url: &str,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<SelfUpdateOutcome, BootstrapError> {
        let cache_path = self.install_root.join(CACHE_DIR).join(MANIFEST_CACHE_FILE);
        let manifest = self
            .cache
            .fetch_or_cached::<ExecutableManifest>(&cache_path, manifest_url)
            .await?
            .value;

        let record = InstalledVersionRecord::load(&self.payload)?;
        let decision = decide(&record, &manifest.version);
        info!(
            installed = %record.version,
            remote = %manifest.version,
            ?decision,
            "Version gate"
        );

        if decision == GateDecision::RunExisting {
            if self.installed_is_intact(&record, &manifest)? {
                return Ok(SelfUpdateOutcome {
                    payload: self.payload.clone(),
                    manifest,
                    updated: false,
                });
            }
            warn!(
                payload = %self.payload.display(),
                "Installed payload does not match its recorded hash, downloading again"
            );
        }

        self.download(&manifest, sink, cancel).await?;
        Ok(SelfUpdateOutcome {
            payload: self.payload.clone(),
            manifest,
            updated: true,
        })
    }

    /// Check the installed payload against the hash declared for its version.
    fn installed_is_intact(
        &self,
        record: &InstalledVersionRecord,
        manifest: &ExecutableManifest,
    ) -> Result<bool, BootstrapError> {
        let expected = if record.version == manifest.version {
            &manifest.hash
        } else {
            &record.hash
        };
        if expected.is_empty() {
            return Ok(false);
        }
        hash::file_matches(&self.payload, HashAlgorithm::Sha256, expected)
    }

    async fn download(
        &self,
        manifest: &ExecutableManifest,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        let size = match manifest.size {
            Some(size) => size,
            None => match self.client.content_length(&manifest.url).await {
                Ok(length) => length.unwrap_or(0),
                Err(e) => {
                    warn!(url = %manifest.url, error = %e, "Could not determine payload size");
                    0
                }
            },
        };

        let (reporter, aggregator) = spawn_aggregator(1, size, sink);
        reporter.report(ProgressEvent::Started {
            task: 0,
            path: self.payload.clone(),
            total: size,
        });

        let part = part_path(&self.payload);
        let fetched = fetch_to_file(
            &self.client,
            &manifest.url,
            &part,
            HashAlgorithm::Sha256,
            cancel,
            |n| reporter.report(ProgressEvent::Advanced { task: 0, bytes: n }),
        )
        .await;

        let result = match fetched {
            Ok((actual, bytes)) => self.install(manifest, &part, actual, bytes).await,
            Err(e) => Err(e),
        };

        reporter.report(match &result {
            Ok(()) => ProgressEvent::Finished { task: 0 },
            Err(_) => ProgressEvent::Failed { task: 0 },
        });
        drop(reporter);
        if let Err(e) = aggregator.await {
            warn!(error = %e, "Progress aggregator ended abnormally");
        }

        result
    }

    /// Verify the fresh download and move it into place.
    async fn install(
        &self,
        manifest: &ExecutableManifest,
        part: &Path,
        actual: String,
        bytes: u64,
    ) -> Result<(), BootstrapError> {
        if !hash::hashes_equal(&actual, &manifest.hash) {
            // The rejected bytes never reach the payload path
            discard(part).await;
            return Err(BootstrapError::CorruptDownload {
                path: self.payload.clone(),
                expected: manifest.hash.to_ascii_lowercase(),
                actual,
            });
        }

        tokio::fs::rename(part, &self.payload).await?;
        set_executable(&self.payload)?;

        InstalledVersionRecord {
            version: manifest.version.clone(),
            hash: actual,
        }
        .save(&self.payload)?;

        info!(
            payload = %self.payload.display(),
            version = %manifest.version,
            bytes,
            "Payload updated"
        );
        Ok(())
    }
}
