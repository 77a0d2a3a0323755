//! Classifier facade used by training and sorting.
//!
//! The sorting engine only needs [`ImageClassifier`]; the orchestrator also
//! trains, saves and loads through [`TrainableClassifier`]. The bundled
//! implementation is [`CentroidClassifier`], a nearest-centroid head over a
//! frozen [`FeatureExtractor`]. With the `classification` feature the
//! extractor can be an ONNX graph:
//!
//! ```no_run
//! # #[cfg(feature = "classification")]
//! # fn demo() -> Result<(), labelsort_core::ClassifierError> {
//! use labelsort_core::classifier::runtime::{ExtractorConfig, OnnxFeatureExtractor};
//! use labelsort_core::CentroidClassifier;
//!
//! let extractor = OnnxFeatureExtractor::new(
//!     "assets/inception/feature_extractor.onnx".as_ref(),
//!     ExtractorConfig::default(),
//! )?;
//! let classifier = CentroidClassifier::new(extractor);
//! # let _ = classifier;
//! # Ok(())
//! # }
//! ```

mod centroid;
#[cfg(feature = "classification")]
pub mod runtime;

pub use centroid::{CentroidClassifier, SCORE_SHARPNESS};

use crate::dataset::SplitOutcome;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions recognized by the bundled classifier.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Errors that can occur while training, persisting or running a classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("no model has been trained or loaded")]
    NotReady,
    #[error("invalid image path: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("no usable training images")]
    EmptyTrainingSet,
    #[error("feature length mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("io error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("processing error: {0}")]
    Processing(String),
}

/// Result of classifying one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub image_path: PathBuf,
    pub predicted_label: Option<String>,
    /// One probability per known class, in the classifier's label order.
    pub scores: Vec<f32>,
}

impl Prediction {
    /// Highest class score, used as the prediction's confidence.
    pub fn max_score(&self) -> Option<f32> {
        self.scores.iter().copied().reduce(f32::max)
    }

    /// Non-empty predicted label, if any.
    pub fn label(&self) -> Option<&str> {
        self.predicted_label
            .as_deref()
            .filter(|label| !label.is_empty())
    }

    /// Whether the prediction has a label and a confidence strictly above `threshold`.
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.label().is_some()
            && self
                .max_score()
                .map(|score| score > threshold)
                .unwrap_or(false)
    }
}

impl Display for Prediction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self
            .image_path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        write!(
            f,
            "Image: {} predicted as: {} with score: {}",
            name,
            self.predicted_label.as_deref().unwrap_or(""),
            self.max_score().unwrap_or(0.0)
        )
    }
}

/// Evaluation of a freshly trained model on the test partition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Mean log-loss over the test partition; lower is better.
    pub log_loss: f64,
    /// Mean log-loss per class, in the classifier's label order.
    pub per_class_log_loss: Vec<f64>,
    pub test_predictions: Vec<Prediction>,
}

impl TrainingMetrics {
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .test_predictions
            .iter()
            .map(|prediction| prediction.to_string())
            .collect();
        lines.push(format!("LogLoss is: {}", self.log_loss));
        let per_class: Vec<String> = self
            .per_class_log_loss
            .iter()
            .map(|loss| loss.to_string())
            .collect();
        lines.push(format!("PerClassLogLoss is: {}", per_class.join(" , ")));
        lines.join("\n")
    }
}

/// Single-image inference. Implementations are not expected to be safe for
/// concurrent use; callers serialize access.
pub trait ImageClassifier {
    /// Lower-case file extensions, without the dot, this classifier can read.
    fn extensions(&self) -> &[String];

    /// Whether a model is available for inference.
    fn is_ready(&self) -> bool {
        true
    }

    fn classify(&mut self, image_path: &Path) -> Result<Prediction, ClassifierError>;
}

/// A classifier that can be fitted on a split dataset and persisted.
pub trait TrainableClassifier: ImageClassifier {
    fn train(&mut self, dataset: &SplitOutcome) -> Result<TrainingMetrics, ClassifierError>;

    fn save(&self, path: &Path) -> Result<(), ClassifierError>;

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError>;
}

/// Frozen feature network: maps an image to a fixed-length feature vector.
pub trait FeatureExtractor {
    fn extract(&mut self, image_path: &Path) -> Result<Vec<f32>, ClassifierError>;
}

/// Softmax function for converting logits to probabilities.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = logits.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}
