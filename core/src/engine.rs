//! Sorting engine: classifies every image under a source tree and copies the
//! confident ones into `destination/<label>/`.

use crate::classifier::{ClassifierError, ImageClassifier, Prediction};
use crate::progress::{SortProgress, PROGRESS_INTERVAL};
use crate::registry::KnownImageRegistry;
use crate::scanner::collect_images;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Labels starting with this marker are copied but never count towards the limit.
pub const INTERNAL_LABEL_MARKER: char = '_';

#[derive(Debug, Error)]
pub enum SortError {
    #[error("minimum score must be greater than 0 and less than 1, got {0}")]
    InvalidThreshold(f32),
    #[error("classifier has no usable model")]
    ClassifierUnavailable,
    #[error("failed to enumerate {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to copy into {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file name not found for {}", .0.display())]
    MissingFileName(PathBuf),
}

/// Parameters of one sorting run.
#[derive(Clone, Debug, PartialEq)]
pub struct SortConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Stop once this many non-internal images were copied; `None` sorts everything.
    pub limit: Option<usize>,
    /// Exclusive lower bound on the top class score, within `(0, 1)`.
    pub min_score: f32,
}

/// Counters of a sorting run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SortResult {
    pub total: usize,
    pub processed: usize,
    /// Copied images whose label is not internal-use.
    pub accepted: usize,
    /// Every copied image, internal labels included.
    pub copied: usize,
    /// Candidates the classifier could not handle.
    pub failed: usize,
}

impl SortResult {
    pub fn progress(&self) -> SortProgress {
        SortProgress {
            total: self.total,
            processed: self.processed,
            accepted: self.accepted,
        }
    }
}

/// Receives engine events synchronously, in candidate order.
pub trait SortObserver {
    fn on_progress(&mut self, _progress: SortProgress) {}

    /// Called after an accepted image has been copied.
    fn on_prediction(&mut self, _prediction: &Prediction) {}

    fn on_failure(&mut self, _image_path: &Path, _error: &ClassifierError) {}
}

pub struct NoopObserver;

impl SortObserver for NoopObserver {}

#[derive(Debug)]
pub struct SortEngine {
    config: SortConfig,
}

impl SortEngine {
    /// Validates the threshold before anything touches the filesystem.
    pub fn new(mut config: SortConfig) -> Result<Self, SortError> {
        if !(config.min_score > 0.0 && config.min_score < 1.0) {
            return Err(SortError::InvalidThreshold(config.min_score));
        }
        config.limit = config.limit.filter(|limit| *limit > 0);
        Ok(Self { config })
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Classifies candidates one at a time, holding the classifier lock only
    /// for the inference call. Classification failures are counted and
    /// skipped; filesystem failures abort the run.
    ///
    /// Copies never overwrite a candidate of this run or a file written
    /// earlier in it; such collisions get a numbered name instead.
    pub fn run<C>(
        &self,
        classifier: &Mutex<C>,
        registry: &KnownImageRegistry,
        observer: &mut dyn SortObserver,
    ) -> Result<SortResult, SortError>
    where
        C: ImageClassifier + ?Sized,
    {
        let extensions = {
            let guard = classifier
                .lock()
                .map_err(|_| SortError::ClassifierUnavailable)?;
            if !guard.is_ready() {
                return Err(SortError::ClassifierUnavailable);
            }
            guard.extensions().to_vec()
        };

        let candidates =
            collect_images(&self.config.source, &extensions).map_err(|source| SortError::Walk {
                path: self.config.source.clone(),
                source,
            })?;

        let mut result = SortResult {
            total: candidates.len(),
            ..SortResult::default()
        };
        let mut claimed: FxHashSet<PathBuf> = candidates
            .iter()
            .map(|candidate| fs::canonicalize(candidate).unwrap_or_else(|_| candidate.clone()))
            .collect();

        for candidate in &candidates {
            result.processed += 1;

            let outcome = classifier
                .lock()
                .map_err(|_| SortError::ClassifierUnavailable)?
                .classify(candidate)
                .and_then(checked_label);

            match outcome {
                Ok(prediction) if prediction.is_confident(self.config.min_score) => {
                    self.copy_accepted(candidate, &prediction, registry, &mut claimed, &mut result)?;
                    observer.on_prediction(&prediction);
                }
                Ok(_) => {}
                Err(error) => {
                    result.failed += 1;
                    observer.on_failure(candidate, &error);
                }
            }

            if result.processed % PROGRESS_INTERVAL == 0 {
                observer.on_progress(result.progress());
            }

            if self.limit_reached(&result) {
                break;
            }
        }

        observer.on_progress(result.progress());
        Ok(result)
    }

    fn limit_reached(&self, result: &SortResult) -> bool {
        self.config
            .limit
            .is_some_and(|limit| result.accepted >= limit)
    }

    fn copy_accepted(
        &self,
        source: &Path,
        prediction: &Prediction,
        registry: &KnownImageRegistry,
        claimed: &mut FxHashSet<PathBuf>,
        result: &mut SortResult,
    ) -> Result<(), SortError> {
        let Some(label) = prediction.label() else {
            return Ok(());
        };
        let folder = self.config.destination.join(label);
        fs::create_dir_all(&folder).map_err(|error| SortError::Io {
            path: folder.clone(),
            source: error,
        })?;

        let folder = fs::canonicalize(&folder).map_err(|error| SortError::Io {
            path: folder.clone(),
            source: error,
        })?;

        let file_name = source
            .file_name()
            .ok_or_else(|| SortError::MissingFileName(source.to_path_buf()))?;
        let io_error = |error: std::io::Error| SortError::Io {
            path: source.to_path_buf(),
            source: error,
        };
        let size_bytes = fs::metadata(source).map_err(io_error)?.len();
        let resolved_source = fs::canonicalize(source).map_err(io_error)?;
        let target = registry.resolve_dest_name(&folder.join(file_name), size_bytes);

        // Already sorted into place, e.g. when the source is the result folder.
        if target != resolved_source {
            let target = unclaimed_target(target, claimed);
            fs::copy(source, &target).map_err(|error| SortError::Io {
                path: target.clone(),
                source: error,
            })?;
            claimed.insert(target);
        }

        result.copied += 1;
        if !label.starts_with(INTERNAL_LABEL_MARKER) {
            result.accepted += 1;
        }
        Ok(())
    }
}

/// Returns `target`, or the first free `<stem>_<n>.<ext>` sibling when it is taken.
fn unclaimed_target(target: PathBuf, claimed: &FxHashSet<PathBuf>) -> PathBuf {
    if !claimed.contains(&target) {
        return target;
    }
    let stem = target
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned());

    let mut counter = 1usize;
    loop {
        let name = match &extension {
            Some(extension) => format!("{}_{}.{}", stem, counter, extension),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = target.with_file_name(name);
        if !claimed.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Rejects labels that would not name a single folder directly below the destination.
fn checked_label(prediction: Prediction) -> Result<Prediction, ClassifierError> {
    if let Some(label) = prediction.label() {
        let mut components = Path::new(label).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal {
            return Err(ClassifierError::Processing(format!(
                "label {:?} is not a plain folder name",
                label
            )));
        }
    }
    Ok(prediction)
}
