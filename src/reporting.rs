use indicatif::ProgressBar;
use labelsort_core::{
    default_style, ClassifierError, Prediction, RunLog, SortObserver, SortProgress,
};
use std::path::Path;

/// Mirrors engine progress onto a terminal bar and records predictions in the run log.
pub struct ProgressObserver<'a> {
    bar: ProgressBar,
    log: &'a RunLog,
}

impl<'a> ProgressObserver<'a> {
    pub fn new(log: &'a RunLog) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(default_style());
        Self { bar, log }
    }

    pub fn finish(&self) {
        self.bar.finish_with_message(format!("{} (done)", self.bar.message()));
    }

    fn record(&self, text: &str) {
        if let Err(error) = self.log.log(text, false) {
            self.bar.suspend(|| eprintln!("Error writing run log: {}", error));
        }
    }
}

impl SortObserver for ProgressObserver<'_> {
    fn on_progress(&mut self, progress: SortProgress) {
        self.bar.set_length(progress.total as u64);
        self.bar.set_position(progress.processed as u64);
        self.bar.set_message(progress.accepted.to_string());
    }

    fn on_prediction(&mut self, prediction: &Prediction) {
        self.record(&prediction.to_string());
    }

    fn on_failure(&mut self, image_path: &Path, error: &ClassifierError) {
        self.record(&format!("Skipped {}: {}", image_path.display(), error));
    }
}
