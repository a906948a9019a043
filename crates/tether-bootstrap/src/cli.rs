//! Command-line arguments and configuration loading

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tether_core::{BootstrapConfig, BootstrapError, Locale, Translator};

/// Configuration file looked up next to the executable.
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Tether bootstrap - keeps an installation current and launches it
#[derive(Parser, Debug)]
#[command(name = "tether-bootstrap")]
#[command(version, about = "Keeps an installation up to date, then launches it")]
pub struct Cli {
    /// Portable installation root (overrides the per-user data directory)
    #[arg(long, env = "TETHER_PATH")]
    pub path: Option<PathBuf>,

    /// Config file path
    #[arg(long, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,

    /// Display locale (e.g. `en`, `fr`)
    #[arg(long)]
    pub locale: Option<String>,

    /// Update only; print the launch command instead of running it
    #[arg(long)]
    pub no_launch: bool,
}

impl Cli {
    /// Config file to read: `--config`, else `tether.toml` beside the executable.
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.config {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe().context("cannot locate the running executable")?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate the configuration.
    pub fn load_config(&self) -> anyhow::Result<BootstrapConfig> {
        let path = self.config_path()?;
        let config = BootstrapConfig::load_from_file(&path)
            .with_context(|| format!("cannot load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Display locale: `--locale`, then the configured locale, then the environment.
    pub fn translator(&self, config: &BootstrapConfig) -> Translator {
        let requested = self
            .locale
            .as_deref()
            .or(config.locale.as_deref())
            .and_then(Locale::parse);

        match requested {
            Some(locale) => Translator::new(locale),
            None => Translator::from_env(),
        }
    }

    /// Log filter: `--debug`, then `--verbose`, then the configured level.
    pub fn log_filter(&self, config: Option<&BootstrapConfig>) -> String {
        if self.debug {
            "debug".to_string()
        } else if self.verbose {
            "info".to_string()
        } else {
            config
                .map(|c| c.logging.level.clone())
                .unwrap_or_else(|| "warn".to_string())
        }
    }
}

/// Process exit codes of the bootstrap itself.
///
/// Once the payload is launched, its own exit status is returned instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Updated (and launched, unless `--no-launch`) successfully
    Success = 0,
    /// Unclassified failure
    GeneralError = 1,
    /// Configuration missing or invalid
    ConfigError = 2,
    /// Host platform not supported
    UnsupportedPlatform = 3,
    /// Manifests unavailable and nothing cached
    ManifestUnavailable = 4,
    /// One or more files could not be downloaded or verified
    DownloadFailed = 5,
    /// Interrupted by the user or the deadline
    Cancelled = 130,
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Classify an engine failure.
    pub fn for_error(error: &BootstrapError) -> Self {
        match error {
            BootstrapError::ConfigError(_) => Self::ConfigError,
            BootstrapError::UnsupportedPlatform { .. } => Self::UnsupportedPlatform,
            BootstrapError::ManifestUnavailable { .. } => Self::ManifestUnavailable,
            BootstrapError::HashMismatch { .. }
            | BootstrapError::CorruptDownload { .. }
            | BootstrapError::DownloadFailed { .. }
            | BootstrapError::DownloadsIncomplete { .. } => Self::DownloadFailed,
            BootstrapError::Cancelled => Self::Cancelled,
            _ => Self::GeneralError,
        }
    }

    /// Classify a failure surfaced through `anyhow`.
    pub fn for_anyhow(error: &anyhow::Error) -> Self {
        error
            .downcast_ref::<BootstrapError>()
            .map(Self::for_error)
            .unwrap_or(Self::GeneralError)
    }
}
