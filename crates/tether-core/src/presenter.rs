//! Presentation collaborator.
//!
//! The engine reports through a [`Presenter`] and never renders anything
//! itself. The binary supplies a console implementation; [`TracingPresenter`]
//! only logs.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::progress::{ProgressSink, ProgressSnapshot};

/// Receives status text, progress fractions and terminal errors.
pub trait Presenter: Send + Sync {
    /// Replace the current status line.
    fn set_status(&self, status: &str);

    /// Report overall and current-file progress, each in `0.0..=1.0`.
    fn set_progress(&self, overall: f64, file: f64);

    /// Name the file currently being transferred.
    fn set_current_file(&self, _name: &str) {}

    /// Replace the status with a terminal error message.
    fn show_error(&self, message: &str);
}

/// Presenter that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn set_status(&self, status: &str) {
        info!(status, "Status");
    }

    fn set_progress(&self, overall: f64, file: f64) {
        debug!(overall, file, "Progress");
    }

    fn show_error(&self, message: &str) {
        error!(message, "Bootstrap failed");
    }
}

/// Forwards aggregated download progress to a [`Presenter`].
pub struct PresenterSink {
    presenter: Arc<dyn Presenter>,
}

impl PresenterSink {
    pub fn new(presenter: Arc<dyn Presenter>) -> Self {
        Self { presenter }
    }
}

impl ProgressSink for PresenterSink {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        if let Some(name) = snapshot.current_file.as_ref().and_then(|p| p.file_name()) {
            self.presenter.set_current_file(&name.to_string_lossy());
        }
        self.presenter
            .set_progress(snapshot.overall_fraction(), snapshot.file_fraction());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Presenter that records every call.
    #[derive(Default)]
    pub(crate) struct RecordingPresenter {
        pub(crate) statuses: Mutex<Vec<String>>,
        pub(crate) progress: Mutex<Vec<(f64, f64)>>,
        pub(crate) files: Mutex<Vec<String>>,
        pub(crate) errors: Mutex<Vec<String>>,
    }

    impl Presenter for RecordingPresenter {
        fn set_status(&self, status: &str) {
            self.statuses.lock().unwrap().push(status.to_string());
        }

        fn set_progress(&self, overall: f64, file: f64) {
            self.progress.lock().unwrap().push((overall, file));
        }

        fn set_current_file(&self, name: &str) {
            self.files.lock().unwrap().push(name.to_string());
        }

        fn show_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_sink_forwards_fractions() {
        let presenter = Arc::new(RecordingPresenter::default());
        let sink = PresenterSink::new(presenter.clone());

        sink.on_progress(&ProgressSnapshot {
            current_file: Some(PathBuf::from("/opt/app/lib/core.jar")),
            file_downloaded: 50,
            file_total: 100,
            files_completed: 1,
            files_failed: 0,
            files_total: 2,
            bytes_downloaded: 150,
            bytes_total: 200,
        });

        assert_eq!(*presenter.progress.lock().unwrap(), vec![(0.5, 0.5)]);
        assert_eq!(*presenter.files.lock().unwrap(), vec!["core.jar".to_string()]);
    }
}
