//! Runtime component resolution.
//!
//! Resolves which runtime file set applies to this host in two hops
//! through the [`ManifestCache`]: the runtime index (platform → component
//! → versions), then the per-version file manifest of the selected
//! component.
//!
//! Version selection takes the first listed entry. The index gives no
//! ordering guarantee, so this is not "latest"; it is the entry the
//! publisher lists first.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cache::{ManifestCache, CACHE_DIR};
use crate::error::BootstrapError;
use crate::manifest::{
    FileManifest, RuntimeFileManifest, RuntimeIndex, RuntimeSpec, RuntimeVersionEntry,
};
use crate::platform::PlatformKey;

/// Directory under the installation root holding runtime components.
pub const RUNTIME_DIR: &str = "runtime";

/// Cache file name of the runtime index.
const INDEX_CACHE_FILE: &str = "runtime_index.json";

/// A runtime component resolved to its file set and install location.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    pub component: String,
    /// Version name as published in the index
    pub version_name: String,
    pub manifest: FileManifest,
    /// `<root>/runtime/<component>/<platform>`
    pub base_path: PathBuf,
}

/// Resolves runtime components for one platform under one installation root.
pub struct RuntimeResolver {
    cache: ManifestCache,
    install_root: PathBuf,
    platform: PlatformKey,
}

impl RuntimeResolver {
    pub fn new(cache: ManifestCache, install_root: PathBuf, platform: PlatformKey) -> Self {
        Self {
            cache,
            install_root,
            platform,
        }
    }

    /// Installation directory of a component on this platform.
    ///
    /// Primary and legacy components get distinct directories so both can
    /// coexist on disk.
    pub fn base_path(&self, component: &str) -> PathBuf {
        component_base_path(&self.install_root, component, &self.platform)
    }

    /// Resolve every configured component that is published for this platform.
    ///
    /// The primary component comes first when published, so the first
    /// element is the one to launch with. The legacy component is kept
    /// converged alongside it.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::NoRuntimeForPlatform`] if the index has no entry
    ///   for this platform.
    /// - [`BootstrapError::NoComponentVersion`] if no candidate is
    ///   published.
    /// - Any [`ManifestCache`] error.
    pub async fn resolve_all(
        &self,
        spec: &RuntimeSpec,
    ) -> Result<Vec<ResolvedRuntime>, BootstrapError> {
        let index = self.fetch_index(spec).await?;
        let selected = self.select(&index, spec)?;

        let mut resolved = Vec::with_capacity(selected.len());
        for (component, entry) in selected {
            resolved.push(self.fetch_component(component, entry).await?);
        }
        Ok(resolved)
    }

    async fn fetch_index(&self, spec: &RuntimeSpec) -> Result<RuntimeIndex, BootstrapError> {
        let cache_path = self.install_root.join(CACHE_DIR).join(INDEX_CACHE_FILE);
        let index = self
            .cache
            .fetch_or_cached::<RuntimeIndex>(&cache_path, &spec.index_url)
            .await?;
        Ok(index.value)
    }

    /// Published candidates for this platform, primary first, each with its
    /// selected version entry.
    fn select<'a>(
        &self,
        index: &'a RuntimeIndex,
        spec: &'a RuntimeSpec,
    ) -> Result<Vec<(&'a str, &'a RuntimeVersionEntry)>, BootstrapError> {
        let components = index
            .platform(self.platform.as_str())
            .ok_or_else(|| BootstrapError::NoRuntimeForPlatform(self.platform.to_string()))?;

        let mut selected = Vec::new();
        for candidate in spec.candidates() {
            match components.get(candidate).and_then(|versions| versions.first()) {
                Some(entry) => {
                    debug!(
                        component = candidate,
                        version = %entry.version.name,
                        released = ?entry.version.released_at(),
                        platform = %self.platform,
                        "Selected runtime version"
                    );
                    selected.push((candidate, entry));
                }
                None => {
                    warn!(
                        component = candidate,
                        platform = %self.platform,
                        "Runtime component not published for this platform"
                    );
                }
            }
        }

        if selected.is_empty() {
            return Err(self.no_component(spec));
        }
        Ok(selected)
    }

    async fn fetch_component(
        &self,
        component: &str,
        entry: &RuntimeVersionEntry,
    ) -> Result<ResolvedRuntime, BootstrapError> {
        let cache_path = self
            .install_root
            .join(CACHE_DIR)
            .join(format!("runtime_{}_{}.json", self.platform, component));

        let document = self
            .cache
            .fetch_or_cached::<RuntimeFileManifest>(&cache_path, &entry.manifest.url)
            .await?;
        let manifest = document.value.file_manifest()?;

        info!(
            component,
            version = %entry.version.name,
            files = manifest.len(),
            "Resolved runtime component"
        );

        Ok(ResolvedRuntime {
            component: component.to_string(),
            version_name: entry.version.name.clone(),
            manifest,
            base_path: self.base_path(component),
        })
    }

    fn no_component(&self, spec: &RuntimeSpec) -> BootstrapError {
        BootstrapError::NoComponentVersion {
            platform: self.platform.to_string(),
            components: spec.candidates().into_iter().map(String::from).collect(),
        }
    }
}

/// `<root>/runtime/<component>/<platform>`.
pub fn component_base_path(root: &Path, component: &str, platform: &PlatformKey) -> PathBuf {
    root.join(RUNTIME_DIR).join(component).join(platform.as_str())
}
