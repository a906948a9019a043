//! Configuration structures for the bootstrap.
//!
//! Supplies the brand, manifest location and installation folder, plus
//! network, install and logging settings. Stored as TOML; every field has
//! a default so a minimal file only needs `manifest_url` and
//! `folder_name`.

use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::BootstrapError;

/// Which payload shape the installation manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Managed runtime plus an application file tree.
    #[default]
    Tree,
    /// A single self-replacing executable.
    Executable,
}

/// Main bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Brand name shown in titles and sent in the User-Agent
    #[serde(default = "default_brand")]
    pub brand: String,

    /// URL of the application (or executable) manifest
    #[serde(default)]
    pub manifest_url: String,

    /// Installation folder name under the per-user data directory
    #[serde(default)]
    pub folder_name: String,

    /// Payload shape
    #[serde(default)]
    pub mode: PayloadMode,

    /// Display locale (empty = detect from environment)
    #[serde(default)]
    pub locale: Option<String>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Installation configuration
    #[serde(default)]
    pub install: InstallConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            brand: default_brand(),
            manifest_url: String::new(),
            folder_name: String::new(),
            mode: PayloadMode::default(),
            locale: None,
            network: NetworkConfig::default(),
            install: InstallConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, BootstrapError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, BootstrapError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.manifest_url.trim().is_empty() {
            return Err(BootstrapError::ConfigError(
                "manifest_url must not be empty".to_string(),
            ));
        }
        if self.folder_name.trim().is_empty() {
            return Err(BootstrapError::ConfigError(
                "folder_name must not be empty".to_string(),
            ));
        }
        if self.network.max_concurrent_downloads == 0 {
            return Err(BootstrapError::ConfigError(
                "network.max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve and create the installation root.
    ///
    /// Precedence: `portable` path, then `install.root`, then the per-user
    /// data directory joined with `folder_name`.
    ///
    /// # Errors
    ///
    /// Fails if no home directory can be determined, or if the root exists
    /// but cannot be inspected, or cannot be created.
    pub fn resolve_install_root(&self, portable: Option<&Path>) -> Result<PathBuf, BootstrapError> {
        let root = match (portable, &self.install.root) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => path.clone(),
            (None, None) => default_data_dir(&self.folder_name)?,
        };

        match std::fs::metadata(&root) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&root)?;
                tracing::debug!(root = %root.display(), "Created installation root");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(root)
    }
}

/// Network configuration for manifests and downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read timeout for streaming in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Maximum retry attempts per download task
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Maximum simultaneous transfers
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Overall deadline for the whole run in seconds (none = unlimited)
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_concurrent_downloads: default_max_concurrent(),
            deadline_secs: None,
        }
    }
}

/// Installation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Explicit installation root (empty = per-user data directory)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Remove files not declared by the application manifest
    #[serde(default = "default_true")]
    pub prune_application: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            root: None,
            prune_application: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive (e.g. "warn", "tether_core=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_brand() -> String {
    "Tether".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_max_concurrent() -> usize {
    8
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Per-user data directory for an installation folder.
///
/// `~/.local/share/<folder>` on Linux, the local configuration directory
/// elsewhere.
fn default_data_dir(folder_name: &str) -> Result<PathBuf, BootstrapError> {
    let base = BaseDirs::new().ok_or_else(|| {
        BootstrapError::ConfigError("could not determine the home directory".to_string())
    })?;

    let dir = if cfg!(target_os = "linux") {
        base.data_local_dir()
    } else {
        base.config_local_dir()
    };

    Ok(dir.join(folder_name))
}
