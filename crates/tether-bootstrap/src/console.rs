//! Console presenter backed by indicatif progress bars

use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tether_core::{Presenter, Translator};

/// Resolution of both bars; fractions are scaled onto this length.
const BAR_LENGTH: u64 = 1000;

/// Two-bar console display: overall progress with the status line, and the
/// file currently being transferred with the elapsed time.
pub struct ConsolePresenter {
    _multi: MultiProgress,
    overall: ProgressBar,
    file: ProgressBar,
    translator: Translator,
    started: Instant,
}

impl ConsolePresenter {
    pub fn new(translator: Translator) -> Self {
        Self::with_target(translator, ProgressDrawTarget::stderr())
    }

    fn with_target(translator: Translator, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let overall = multi.add(ProgressBar::new(BAR_LENGTH));
        overall.set_style(style("{msg}\n[{bar:40.green/dim}] {percent:>3}%"));

        let file = multi.add(ProgressBar::new(BAR_LENGTH));
        file.set_style(style("[{bar:40.cyan/dim}] {percent:>3}% {msg}  {prefix}"));

        overall.enable_steady_tick(Duration::from_millis(250));

        Self {
            _multi: multi,
            overall,
            file,
            translator,
            started: Instant::now(),
        }
    }

    /// Stop drawing and leave the final state on screen.
    pub fn finish(&self) {
        self.file.finish_and_clear();
        self.overall.finish();
    }

    fn elapsed_label(&self) -> String {
        let elapsed = format_elapsed(self.started.elapsed());
        self.translator
            .translate("elapsed_time", &[("elapsed", elapsed.as_str())])
    }
}

impl Presenter for ConsolePresenter {
    fn set_status(&self, status: &str) {
        self.overall.set_message(status.to_string());
    }

    fn set_progress(&self, overall: f64, file: f64) {
        self.overall.set_position(scale(overall));
        self.file.set_position(scale(file));
        self.file.set_prefix(self.elapsed_label());
    }

    fn set_current_file(&self, name: &str) {
        self.file.set_message(name.to_string());
    }

    fn show_error(&self, message: &str) {
        self.file.finish_and_clear();
        self.overall.abandon_with_message(message.to_string());
    }
}

impl Drop for ConsolePresenter {
    fn drop(&mut self) {
        if !self.overall.is_finished() {
            self.finish();
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn scale(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64
}

/// `m:ss`, or `h:mm:ss` past the hour.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
