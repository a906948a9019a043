//! Fetch-with-local-fallback for manifest documents.
//!
//! Every manifest kind goes through the same policy:
//!
//! 1. Read the cached copy. A missing file is a cache miss; any other read
//!    failure is fatal and no network request is made.
//! 2. A cached copy that does not parse is treated as a miss.
//! 3. Fetch the live document.
//! 4. On success, persist it over the cache (creating parent directories)
//!    and return it. A failed write is fatal.
//! 5. On failure, fall back to the cached copy if there is one.
//! 6. Otherwise fail with [`BootstrapError::ManifestUnavailable`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::http::Fetch;

/// Subdirectory of the installation root holding cached manifests.
pub const CACHE_DIR: &str = ".cache";

/// A manifest paired with the file it is persisted to.
#[derive(Debug, Clone)]
pub struct CachedDocument<T> {
    pub value: T,
    pub path: PathBuf,
    /// Whether `value` came from the network in this run.
    pub fresh: bool,
}

/// Generic manifest cache backed by a [`Fetch`] source.
#[derive(Clone)]
pub struct ManifestCache {
    source: Arc<dyn Fetch>,
}

impl ManifestCache {
    /// Create a cache that refreshes documents from `source`.
    pub fn new(source: Arc<dyn Fetch>) -> Self {
        Self { source }
    }

    /// Load `cache_path`, refresh it from `url`, and reconcile the two.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Io`] if the cache exists but cannot be read, or
    ///   if a freshly fetched document cannot be written back.
    /// - [`BootstrapError::ManifestUnavailable`] if the fetch fails and no
    ///   usable cached copy exists.
    pub async fn fetch_or_cached<T>(
        &self,
        cache_path: &Path,
        url: &str,
    ) -> Result<CachedDocument<T>, BootstrapError>
    where
        T: DeserializeOwned + Serialize,
    {
        let cached: Option<T> = load_cached(cache_path).await?;

        let live = match self.source.fetch_bytes(url).await {
            Ok(body) => serde_json::from_slice::<T>(&body).map_err(BootstrapError::from),
            Err(e) => Err(e),
        };

        match (live, cached) {
            (Ok(value), _) => {
                store(cache_path, &value).await?;
                info!(url, cache = %cache_path.display(), "Manifest refreshed");
                Ok(CachedDocument {
                    value,
                    path: cache_path.to_path_buf(),
                    fresh: true,
                })
            }
            (Err(e), Some(value)) => {
                warn!(
                    url,
                    cache = %cache_path.display(),
                    error = %e,
                    "Manifest fetch failed, using cached copy"
                );
                Ok(CachedDocument {
                    value,
                    path: cache_path.to_path_buf(),
                    fresh: false,
                })
            }
            (Err(e), None) => Err(BootstrapError::ManifestUnavailable {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Read and decode a cached document.
///
/// `Ok(None)` for a missing or corrupt file; `Err` for any other read failure.
async fn load_cached<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BootstrapError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(cache = %path.display(), "No cached manifest");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(cache = %path.display(), error = %e, "Cached manifest is corrupt, ignoring it");
            Ok(None)
        }
    }
}

/// Persist a document as pretty-printed JSON.
async fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), BootstrapError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, data).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory document source; unknown URLs fail like a dead network.
    #[derive(Default)]
    pub(crate) struct StubSource {
        documents: Mutex<HashMap<String, Bytes>>,
        pub(crate) requests: AtomicUsize,
    }

    impl StubSource {
        pub(crate) fn with(self, url: &str, body: impl Into<Bytes>) -> Self {
            self.documents
                .lock()
                .unwrap()
                .insert(url.to_string(), body.into());
            self
        }

        pub(crate) fn with_json(self, url: &str, value: serde_json::Value) -> Self {
            self.with(url, serde_json::to_vec(&value).unwrap())
        }
    }

    #[async_trait]
    impl Fetch for StubSource {
        async fn fetch_bytes(&self, url: &str) -> Result<Bytes, BootstrapError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.documents
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| BootstrapError::NetworkError("connection refused".to_string()))
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: String,
    }

    const URL: &str = "https://cdn.example.com/doc.json";

    fn cache_for(source: StubSource) -> (ManifestCache, Arc<StubSource>) {
        let source = Arc::new(source);
        (ManifestCache::new(source.clone()), source)
    }

    #[tokio::test]
    async fn test_network_failure_returns_cached_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let original = br#"{"version":"1.0.0"}"#;
        std::fs::write(&path, original).unwrap();

        let (cache, _) = cache_for(StubSource::default());
        let doc: CachedDocument<Doc> = cache.fetch_or_cached(&path, URL).await.unwrap();

        assert_eq!(doc.value.version, "1.0.0");
        assert!(!doc.fresh);
        // No write happened
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_fresh_fetch_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let (cache, _) =
            cache_for(StubSource::default().with_json(URL, serde_json::json!({"version": "2.0.0"})));
        let doc: CachedDocument<Doc> = cache.fetch_or_cached(&path, URL).await.unwrap();

        assert_eq!(doc.value.version, "2.0.0");
        assert!(doc.fresh);
        let persisted: Doc = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(persisted, doc.value);
    }

    #[tokio::test]
    async fn test_live_value_overwrites_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, br#"{"version":"1.0.0"}"#).unwrap();

        let (cache, _) =
            cache_for(StubSource::default().with_json(URL, serde_json::json!({"version": "2.0.0"})));
        let doc: CachedDocument<Doc> = cache.fetch_or_cached(&path, URL).await.unwrap();

        assert_eq!(doc.value.version, "2.0.0");
        let persisted: Doc = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(persisted.version, "2.0.0");
    }

    #[tokio::test]
    async fn test_no_cache_and_no_network_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        let (cache, _) = cache_for(StubSource::default());
        let result: Result<CachedDocument<Doc>, _> = cache.fetch_or_cached(&path, URL).await;

        assert!(matches!(
            result,
            Err(BootstrapError::ManifestUnavailable { .. })
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let (cache, _) = cache_for(StubSource::default());
        let result: Result<CachedDocument<Doc>, _> = cache.fetch_or_cached(&path, URL).await;
        assert!(matches!(
            result,
            Err(BootstrapError::ManifestUnavailable { .. })
        ));

        let (cache, _) =
            cache_for(StubSource::default().with_json(URL, serde_json::json!({"version": "3.0.0"})));
        let doc: CachedDocument<Doc> = cache.fetch_or_cached(&path, URL).await.unwrap();
        assert_eq!(doc.value.version, "3.0.0");
    }

    #[tokio::test]
    async fn test_undecodable_live_body_falls_back_to_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, br#"{"version":"1.0.0"}"#).unwrap();

        let (cache, _) = cache_for(StubSource::default().with(URL, "<html>maintenance</html>"));
        let doc: CachedDocument<Doc> = cache.fetch_or_cached(&path, URL).await.unwrap();

        assert_eq!(doc.value.version, "1.0.0");
        assert!(!doc.fresh);
    }

    #[tokio::test]
    async fn test_unreadable_cache_is_fatal_without_network() {
        let dir = TempDir::new().unwrap();
        // A directory where the cache file should be cannot be read as a file
        let path = dir.path().join("doc.json");
        std::fs::create_dir(&path).unwrap();

        let (cache, source) =
            cache_for(StubSource::default().with_json(URL, serde_json::json!({"version": "2.0.0"})));
        let result: Result<CachedDocument<Doc>, _> = cache.fetch_or_cached(&path, URL).await;

        assert!(matches!(result, Err(BootstrapError::Io(_))));
        assert_eq!(source.requests.load(Ordering::SeqCst), 0);
    }
}
