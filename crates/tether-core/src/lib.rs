//! # tether-core
//!
//! Self-updating bootstrap engine.
//!
//! This crate handles:
//! - Host platform detection against a closed platform table
//! - Remote manifests with an on-disk fallback cache
//! - Managed runtime resolution per platform and component
//! - Reconciliation of local directories against declared file sets
//! - Concurrent, hash-verified downloads with aggregated progress
//! - A version gate for single-executable payloads
//!
//! ## Integrity
//!
//! - Every downloaded file is hashed while it is written and only renamed
//!   into place once its digest matches the manifest
//! - Files a manifest does not declare are pruned from managed trees
//! - A failed or cancelled run leaves no partial file behind

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod hash;
pub mod http;
pub mod i18n;
pub mod launch;
pub mod manifest;
pub mod platform;
pub mod presenter;
pub mod progress;
#[cfg(test)]
mod proptests;
pub mod reconcile;
pub mod runtime;
pub mod selfupdate;

// Re-export main types for convenience
pub use bootstrap::{BootstrapOutcome, BootstrapState, Bootstrapper, BOOTSTRAP_VERSION};
pub use cache::{CachedDocument, ManifestCache};
pub use config::{BootstrapConfig, InstallConfig, LoggingConfig, NetworkConfig, PayloadMode};
pub use download::{DownloadCoordinator, DownloadSummary};
pub use error::BootstrapError;
pub use hash::HashAlgorithm;
pub use http::{Fetch, HttpClient};
pub use i18n::{Locale, Translator};
pub use launch::{LaunchContext, LaunchSpec};
pub use manifest::{AppManifest, ExecutableManifest, FileDescriptor, FileKind, FileManifest};
pub use platform::PlatformKey;
pub use presenter::{Presenter, PresenterSink, TracingPresenter};
pub use progress::{NullSink, ProgressSink, ProgressSnapshot};
pub use reconcile::{reconcile, DownloadTask, OrphanPolicy, ReconciliationPlan};
pub use runtime::{ResolvedRuntime, RuntimeResolver};
pub use selfupdate::{decide, GateDecision, InstalledVersionRecord, SelfUpdateOutcome, SelfUpdater};
