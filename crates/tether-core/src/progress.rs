//! Download progress aggregation.
//!
//! Download units never touch shared counters. Each one sends
//! [`ProgressEvent`]s through a [`ProgressReporter`]; a single aggregator
//! task owns the counters, folds the events into a [`ProgressSnapshot`]
//! and hands every snapshot to a [`ProgressSink`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Event emitted by a single download unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A transfer (or a retry of it) is starting.
    Started {
        task: usize,
        path: PathBuf,
        total: u64,
    },
    /// `bytes` more bytes were written for `task`.
    Advanced { task: usize, bytes: u64 },
    /// The task was verified and is in place.
    Finished { task: usize },
    /// The task gave up.
    Failed { task: usize },
}

/// Aggregated view of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// File most recently reporting progress
    pub current_file: Option<PathBuf>,
    pub file_downloaded: u64,
    pub file_total: u64,
    pub files_completed: usize,
    /// Tasks that gave up, including those stopped by cancellation
    pub files_failed: usize,
    pub files_total: usize,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
}

impl ProgressSnapshot {
    /// Fraction of the current file transferred, in `0.0..=1.0`.
    pub fn file_fraction(&self) -> f64 {
        fraction(self.file_downloaded, self.file_total)
    }

    /// Fraction of files completed, in `0.0..=1.0`.
    pub fn overall_fraction(&self) -> f64 {
        if self.files_total == 0 {
            return 1.0;
        }
        (self.files_completed as f64 / self.files_total as f64).min(1.0)
    }
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

/// Receiver of aggregated progress.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Sink that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// Sending half handed to download units.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    /// Send an event. Progress is best-effort: a closed aggregator is ignored.
    pub fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Spawn the aggregator task.
///
/// The task runs until every [`ProgressReporter`] clone is dropped and
/// resolves to the final snapshot.
pub fn spawn_aggregator(
    files_total: usize,
    bytes_total: u64,
    sink: Arc<dyn ProgressSink>,
) -> (ProgressReporter, JoinHandle<ProgressSnapshot>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut aggregator = Aggregator::new(files_total, bytes_total);
        while let Some(event) = rx.recv().await {
            aggregator.apply(event);
            sink.on_progress(&aggregator.snapshot);
        }
        aggregator.snapshot
    });

    (ProgressReporter { tx }, handle)
}

/// Counter state owned by the aggregator task.
struct Aggregator {
    /// Bytes written so far per task, reset when a task restarts
    per_task: HashMap<usize, (u64, u64)>,
    current: Option<usize>,
    snapshot: ProgressSnapshot,
}

impl Aggregator {
    fn new(files_total: usize, bytes_total: u64) -> Self {
        Self {
            per_task: HashMap::new(),
            current: None,
            snapshot: ProgressSnapshot {
                files_total,
                bytes_total,
                ..ProgressSnapshot::default()
            },
        }
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { task, path, total } => {
                // A retry discards whatever the previous attempt counted
                if let Some((written, _)) = self.per_task.insert(task, (0, total)) {
                    self.snapshot.bytes_downloaded =
                        self.snapshot.bytes_downloaded.saturating_sub(written);
                }
                self.current = Some(task);
                self.snapshot.current_file = Some(path);
            }
            ProgressEvent::Advanced { task, bytes } => {
                let entry = self.per_task.entry(task).or_insert((0, 0));
                entry.0 += bytes;
                self.snapshot.bytes_downloaded += bytes;
                self.current = Some(task);
            }
            ProgressEvent::Finished { task } => {
                self.snapshot.files_completed += 1;
                if let Some((written, total)) = self.per_task.get_mut(&task) {
                    *total = (*total).max(*written);
                }
            }
            ProgressEvent::Failed { .. } => {
                self.snapshot.files_failed += 1;
            }
        }

        if let Some((written, total)) = self.current.and_then(|t| self.per_task.get(&t)) {
            self.snapshot.file_downloaded = *written;
            self.snapshot.file_total = *total;
        }
    }
}
