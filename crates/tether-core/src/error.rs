//! Error types for the bootstrap engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving, reconciling, or downloading.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Host OS/architecture has no entry in the platform table
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// No cached copy and the live fetch failed
    #[error("manifest unavailable from {url}: {reason}")]
    ManifestUnavailable { url: String, reason: String },

    /// The runtime index has no entry for this platform
    #[error("no runtime available for platform {0}")]
    NoRuntimeForPlatform(String),

    /// None of the requested runtime components exist for this platform
    #[error("no version of component(s) {components:?} for platform {platform}")]
    NoComponentVersion {
        platform: String,
        components: Vec<String>,
    },

    /// A downloaded file does not match its declared hash
    #[error("hash mismatch for {path:?}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The freshly downloaded payload does not match the hash declared for its version.
    ///
    /// Distinct from a stale install: the download channel itself returned bad bytes.
    #[error("freshly downloaded artifact {path:?} is corrupt: expected {expected}, got {actual}")]
    CorruptDownload {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Server answered with a non-success HTTP status
    #[error("download of {url} failed with status {status}")]
    DownloadFailed { url: String, status: u16 },

    /// Transport-level failure while streaming a body
    #[error("network error: {0}")]
    NetworkError(String),

    /// One or more tasks of a bulk download failed after retries
    #[error("{failed} of {total} downloads failed; first error: {first}")]
    DownloadsIncomplete {
        failed: usize,
        total: usize,
        first: Box<BootstrapError>,
    },

    /// The run was aborted by the user or the overall deadline
    #[error("operation cancelled")]
    Cancelled,

    /// Manifest content is structurally invalid
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl BootstrapError {
    /// Whether a download attempt that failed with this error is worth retrying.
    ///
    /// Transport failures, server-side errors, throttling and short or
    /// garbled transfers are retryable. Local I/O, client errors and
    /// cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::HttpError(_) | Self::HashMismatch { .. } => true,
            Self::DownloadFailed { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_body() || err.is_decode() {
            BootstrapError::NetworkError(err.to_string())
        } else {
            BootstrapError::HttpError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for BootstrapError {
    fn from(err: toml::de::Error) -> Self {
        BootstrapError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BootstrapError::NetworkError("reset".to_string()).is_retryable());
        assert!(BootstrapError::DownloadFailed {
            url: "u".to_string(),
            status: 503
        }
        .is_retryable());
        assert!(BootstrapError::DownloadFailed {
            url: "u".to_string(),
            status: 429
        }
        .is_retryable());
        assert!(!BootstrapError::DownloadFailed {
            url: "u".to_string(),
            status: 404
        }
        .is_retryable());
        assert!(!BootstrapError::Cancelled.is_retryable());
        assert!(!BootstrapError::Io(std::io::Error::other("disk")).is_retryable());
    }

    #[test]
    fn test_corrupt_download_is_terminal() {
        let err = BootstrapError::CorruptDownload {
            path: PathBuf::from("app.bin"),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("corrupt"));
    }
}
