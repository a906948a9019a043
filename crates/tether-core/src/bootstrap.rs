//! Bootstrap orchestration.
//!
//! [`Bootstrapper`] runs one complete pass: fetch the application
//! manifest, resolve the runtime components, reconcile every managed tree,
//! download what is missing, and hand back a [`LaunchSpec`]. In
//! executable mode the pass is delegated to the [`SelfUpdater`].
//!
//! Progress is reported to a [`Presenter`] as localized status text; a
//! failure replaces the status with a terminal message.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{ManifestCache, CACHE_DIR};
use crate::config::{BootstrapConfig, PayloadMode};
use crate::download::{DownloadCoordinator, DownloadSummary};
use crate::error::BootstrapError;
use crate::http::{user_agent, HttpClient};
use crate::i18n::Translator;
use crate::launch::{LaunchContext, LaunchSpec};
use crate::manifest::AppManifest;
use crate::platform::PlatformKey;
use crate::presenter::{Presenter, PresenterSink};
use crate::reconcile::{reconcile, OrphanPolicy, ReconciliationPlan};
use crate::runtime::RuntimeResolver;
use crate::selfupdate::SelfUpdater;

/// Version of this bootstrap, reported in the User-Agent and `${bsVersion}`.
pub const BOOTSTRAP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory under the installation root holding the application tree.
pub const APPLICATION_DIR: &str = "launcher";

/// Cache file name of the application manifest.
const APP_MANIFEST_CACHE_FILE: &str = "launcher_manifest.json";

/// Current phase of a bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BootstrapState {
    #[default]
    Idle,
    FetchingManifest,
    ResolvingRuntime,
    Reconciling,
    Downloading,
    /// Converged and ready to launch
    Ready,
    Failed(String),
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub launch: LaunchSpec,
    pub downloaded: DownloadSummary,
    /// Undeclared files removed during reconciliation
    pub orphans: BTreeSet<PathBuf>,
}

/// Drives a bootstrap run from manifest to launch specification.
pub struct Bootstrapper {
    config: BootstrapConfig,
    install_root: PathBuf,
    portable: bool,
    platform: PlatformKey,
    client: HttpClient,
    cache: ManifestCache,
    presenter: Arc<dyn Presenter>,
    translator: Translator,
    state: Arc<RwLock<BootstrapState>>,
}

impl Bootstrapper {
    /// Create a bootstrapper for an already resolved installation root.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::HttpError`] if the HTTP client cannot be built.
    pub fn new(
        config: BootstrapConfig,
        install_root: PathBuf,
        portable: bool,
        platform: PlatformKey,
        presenter: Arc<dyn Presenter>,
        translator: Translator,
    ) -> Result<Self, BootstrapError> {
        let client = HttpClient::new(
            &config.network,
            &user_agent(&config.brand, BOOTSTRAP_VERSION),
        )?;
        let cache = ManifestCache::new(Arc::new(client.clone()));

        Ok(Self {
            config,
            install_root,
            portable,
            platform,
            client,
            cache,
            presenter,
            translator,
            state: Arc::new(RwLock::new(BootstrapState::Idle)),
        })
    }

    pub async fn state(&self) -> BootstrapState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, state: BootstrapState) {
        debug!(?state, "Bootstrap state");
        *self.state.write().await = state;
    }

    fn status(&self, id: &str, args: &[(&str, &str)]) {
        self.presenter
            .set_status(&self.translator.translate(id, args));
    }

    /// Run one bootstrap pass.
    ///
    /// Cancelling `cancel`, or reaching the configured deadline, aborts the
    /// run with [`BootstrapError::Cancelled`].
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let token = cancel.child_token();
        let deadline = self.config.network.deadline_secs.map(|secs| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                info!(secs, "Deadline reached, cancelling");
                token.cancel();
            })
        });

        info!(
            root = %self.install_root.display(),
            platform = %self.platform,
            mode = ?self.config.mode,
            "Starting bootstrap"
        );

        let result = match self.config.mode {
            PayloadMode::Tree => self.run_tree(&token).await,
            PayloadMode::Executable => self.run_executable(&token).await,
        };

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        match result {
            Ok(outcome) => {
                self.set_state(BootstrapState::Ready).await;
                Ok(outcome)
            }
            Err(e) => {
                let message = self.failure_message(&self.state().await, &e);
                error!(error = %e, "Bootstrap failed");
                self.presenter.show_error(&message);
                self.set_state(BootstrapState::Failed(message)).await;
                Err(e)
            }
        }
    }

    async fn run_tree(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        self.set_state(BootstrapState::FetchingManifest).await;
        self.status("fetching_updates", &[]);
        let cache_path = self.install_root.join(CACHE_DIR).join(APP_MANIFEST_CACHE_FILE);
        let manifest = cancellable(
            cancel,
            self.cache
                .fetch_or_cached::<AppManifest>(&cache_path, &self.config.manifest_url),
        )
        .await?
        .value;
        let app_files = manifest.file_manifest()?;

        self.set_state(BootstrapState::ResolvingRuntime).await;
        self.status(
            "resolving_runtime",
            &[("component", manifest.runtime.component.as_str())],
        );
        let resolver = RuntimeResolver::new(
            self.cache.clone(),
            self.install_root.clone(),
            self.platform.clone(),
        );
        let runtimes = cancellable(cancel, resolver.resolve_all(&manifest.runtime)).await?;
        let launch_base = runtimes
            .first()
            .map(|r| r.base_path.clone())
            .ok_or_else(|| BootstrapError::NoRuntimeForPlatform(self.platform.to_string()))?;

        self.set_state(BootstrapState::Reconciling).await;
        self.status("checking_files", &[]);
        let app_base = self.install_root.join(APPLICATION_DIR);
        let app_policy = if self.config.install.prune_application {
            OrphanPolicy::Prune
        } else {
            OrphanPolicy::Keep
        };

        let plan = {
            let app_base = app_base.clone();
            tokio::task::spawn_blocking(move || {
                let mut plan = ReconciliationPlan::default();
                for runtime in &runtimes {
                    let runtime_plan =
                        reconcile(&runtime.manifest, &runtime.base_path, OrphanPolicy::Prune)?;
                    plan.merge(runtime_plan);
                }
                plan.merge(reconcile(&app_files, &app_base, app_policy)?);
                Ok::<_, BootstrapError>(plan)
            })
            .await
            .map_err(|e| BootstrapError::Io(io::Error::other(e)))??
        };

        if cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }

        let downloaded = if plan.downloads.is_empty() {
            self.status("up_to_date", &[("brand", self.config.brand.as_str())]);
            DownloadSummary::default()
        } else {
            self.set_state(BootstrapState::Downloading).await;
            self.status("downloading", &[]);
            let coordinator = DownloadCoordinator::new(self.client.clone(), &self.config.network);
            let sink = Arc::new(PresenterSink::new(self.presenter.clone()));
            coordinator.execute(&plan, sink, cancel).await?
        };

        self.status("launching", &[("brand", self.config.brand.as_str())]);
        let launch =
            LaunchSpec::for_tree(&self.launch_context(), &launch_base, &app_base, &manifest);

        Ok(BootstrapOutcome {
            launch,
            downloaded,
            orphans: plan.orphans,
        })
    }

    async fn run_executable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        self.set_state(BootstrapState::FetchingManifest).await;
        self.status("fetching_updates", &[]);

        let updater = SelfUpdater::new(
            self.cache.clone(),
            self.client.clone(),
            self.install_root.clone(),
            self.payload_path(),
        );
        let sink = Arc::new(PresenterSink::new(self.presenter.clone()));
        let outcome = updater.run(&self.config.manifest_url, sink, cancel).await?;

        let brand = self.config.brand.as_str();
        if !outcome.updated {
            self.status("up_to_date", &[("brand", brand)]);
        }
        self.status("launching", &[("brand", brand)]);

        let launch = LaunchSpec::for_executable(
            &self.launch_context(),
            &outcome.payload,
            &outcome.manifest.args,
        );
        Ok(BootstrapOutcome {
            launch,
            downloaded: DownloadSummary {
                files: usize::from(outcome.updated),
                bytes: 0,
            },
            orphans: BTreeSet::new(),
        })
    }

    /// `<root>/bin/<folder_name>[.exe]`
    pub fn payload_path(&self) -> PathBuf {
        self.install_root.join("bin").join(format!(
            "{}{}",
            self.config.folder_name,
            std::env::consts::EXE_SUFFIX
        ))
    }

    fn launch_context(&self) -> LaunchContext {
        LaunchContext {
            root_path: self.install_root.clone(),
            platform: self.platform.clone(),
            portable: self.portable,
            bootstrap_version: BOOTSTRAP_VERSION.to_string(),
        }
    }

    fn failure_message(&self, phase: &BootstrapState, e: &BootstrapError) -> String {
        let err = e.to_string();
        let id = match (phase, e) {
            (_, BootstrapError::Cancelled) => "cancelled",
            (_, BootstrapError::CorruptDownload { .. }) => "corrupt_download",
            (BootstrapState::Downloading, _) | (_, BootstrapError::DownloadsIncomplete { .. }) => {
                "fail_download"
            }
            _ => "failed_init",
        };
        self.translator.translate(id, &[("err", err.as_str())])
    }
}

/// Race `future` against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl std::future::Future<Output = Result<T, BootstrapError>>,
) -> Result<T, BootstrapError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(BootstrapError::Cancelled),
        result = future => result,
    }
}
