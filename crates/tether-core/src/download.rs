//! Plan execution: concurrent, verified file downloads.
//!
//! Each [`DownloadTask`] streams into a provisional `<dest>.part` sibling
//! while its content hash is computed. Only a transfer whose hash matches
//! the declared one is renamed over the destination, so a truncated or
//! interrupted download never looks complete. Leftover `.part` files are
//! undeclared and get pruned by the next reconciliation.
//!
//! Transfers run with bounded concurrency; retryable failures are retried
//! with exponential backoff. Every task runs to an outcome before the
//! coordinator reports, so one bad file does not abandon the rest.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::error::BootstrapError;
use crate::hash::{self, HashAlgorithm};
use crate::http::HttpClient;
use crate::progress::{spawn_aggregator, ProgressEvent, ProgressReporter, ProgressSink};
use crate::reconcile::{set_executable, DownloadTask, ReconciliationPlan};

/// Suffix of provisional download files.
pub const PART_SUFFIX: &str = ".part";

/// Result of a fully successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Executes the download half of a [`ReconciliationPlan`].
pub struct DownloadCoordinator {
    client: HttpClient,
    max_concurrent: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl DownloadCoordinator {
    /// Create a coordinator using the limits in `network`.
    pub fn new(client: HttpClient, network: &NetworkConfig) -> Self {
        Self {
            client,
            max_concurrent: network.max_concurrent_downloads.max(1),
            max_retries: network.max_retries,
            retry_base_delay: Duration::from_millis(network.retry_base_delay_ms),
        }
    }

    /// Download every task of `plan`, reporting progress to `sink`.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Cancelled`] if `cancel` stopped any task;
    ///   in-flight provisional files are removed.
    /// - [`BootstrapError::DownloadsIncomplete`] if any task still failed
    ///   after its retries. All other tasks have run to completion.
    pub async fn execute(
        &self,
        plan: &ReconciliationPlan,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<DownloadSummary, BootstrapError> {
        let total = plan.downloads.len();
        if total == 0 {
            return Ok(DownloadSummary::default());
        }

        info!(
            files = total,
            bytes = plan.total_bytes(),
            concurrency = self.max_concurrent,
            "Starting downloads"
        );

        let (reporter, aggregator) = spawn_aggregator(total, plan.total_bytes(), sink);

        let outcomes: Vec<Result<u64, BootstrapError>> =
            stream::iter(plan.downloads.iter().enumerate())
                .map(|(index, task)| {
                    let reporter = reporter.clone();
                    async move { self.run_task(index, task, &reporter, cancel).await }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        drop(reporter);
        if let Err(e) = aggregator.await {
            warn!(error = %e, "Progress aggregator ended abnormally");
        }

        // A token firing after every task finished changes nothing on disk
        if outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(BootstrapError::Cancelled)))
        {
            return Err(BootstrapError::Cancelled);
        }

        let mut summary = DownloadSummary::default();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(bytes) => {
                    summary.files += 1;
                    summary.bytes += bytes;
                }
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            info!(files = summary.files, bytes = summary.bytes, "Downloads complete");
            return Ok(summary);
        }

        let failed = failures.len();
        error!(failed, total, "Downloads incomplete");
        let first = failures.swap_remove(0);
        Err(BootstrapError::DownloadsIncomplete {
            failed,
            total,
            first: Box::new(first),
        })
    }

    /// Run one task with bounded retry.
    async fn run_task(
        &self,
        index: usize,
        task: &DownloadTask,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, BootstrapError> {
        let mut attempt = 0u32;
        loop {
            reporter.report(ProgressEvent::Started {
                task: index,
                path: task.destination.clone(),
                total: task.expected_size,
            });

            match self.attempt(index, task, reporter, cancel).await {
                Ok(bytes) => {
                    reporter.report(ProgressEvent::Finished { task: index });
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff_delay(self.retry_base_delay, attempt);
                    attempt += 1;
                    warn!(
                        url = %task.source_url,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            reporter.report(ProgressEvent::Failed { task: index });
                            return Err(BootstrapError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if !matches!(e, BootstrapError::Cancelled) {
                        error!(
                            url = %task.source_url,
                            path = %task.destination.display(),
                            error = %e,
                            "Download failed"
                        );
                    }
                    reporter.report(ProgressEvent::Failed { task: index });
                    return Err(e);
                }
            }
        }
    }

    /// One transfer: stream, verify, rename, fix permissions.
    async fn attempt(
        &self,
        index: usize,
        task: &DownloadTask,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, BootstrapError> {
        let part = part_path(&task.destination);

        let (actual, bytes) = fetch_to_file(
            &self.client,
            &task.source_url,
            &part,
            task.algorithm,
            cancel,
            |n| reporter.report(ProgressEvent::Advanced { task: index, bytes: n }),
        )
        .await?;

        if !hash::hashes_equal(&actual, &task.expected_hash) {
            discard(&part).await;
            return Err(BootstrapError::HashMismatch {
                path: task.destination.clone(),
                expected: task.expected_hash.to_ascii_lowercase(),
                actual,
            });
        }

        tokio::fs::rename(&part, &task.destination).await?;
        if task.executable {
            set_executable(&task.destination)?;
        }

        debug!(path = %task.destination.display(), bytes, "Downloaded");
        Ok(bytes)
    }
}

/// Stream `url` into `dest`, hashing as it goes.
///
/// `on_chunk` receives the size of every chunk written. Returns the hex
/// digest and the number of bytes written. On cancellation or error the
/// partially written `dest` is removed.
pub async fn fetch_to_file<F>(
    client: &HttpClient,
    url: &str,
    dest: &Path,
    algorithm: HashAlgorithm,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<(String, u64), BootstrapError>
where
    F: FnMut(u64) + Send,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
        response = client.get(url) => response?,
    };

    let mut file = tokio::fs::File::create(dest).await?;
    let result = async {
        let mut body = response.bytes_stream();
        let mut hasher = algorithm.hasher();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, BootstrapError>((hasher.finalize_hex(), written))
    }
    .await;

    if result.is_err() {
        drop(file);
        discard(dest).await;
    }
    result
}

/// `<dest>.part`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Exponential backoff: `base * 2^attempt`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Remove a provisional file, ignoring absence.
pub(crate) async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove provisional file");
        }
    }
}
