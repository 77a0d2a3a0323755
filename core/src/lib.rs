//! Core sorting engine for labelsort.
//!
//! The crate splits a labelled image tree into training and test manifests,
//! drives a pluggable classifier through training or loading, and sorts a
//! directory of unlabeled images into per-label folders. Images that were
//! already part of the labelled set are detected by a weak identity check
//! (file name, size and label folder) and copied under a `known_` prefix.

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod logger;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod reporting;
pub mod scanner;

pub use classifier::{
    CentroidClassifier, ClassifierError, FeatureExtractor, ImageClassifier, Prediction,
    TrainableClassifier, TrainingMetrics,
};
pub use config::{AssetLayout, ConfigError, Settings};
pub use dataset::{
    read_manifest, write_manifest, DatasetError, DatasetSplitter, LabeledImage, SplitOutcome,
    DEFAULT_TEST_FRACTION,
};
pub use engine::{
    NoopObserver, SortConfig, SortEngine, SortError, SortObserver, SortResult,
    INTERNAL_LABEL_MARKER,
};
pub use logger::{LogError, RunLog};
pub use orchestrator::{Pipeline, PipelineError};
pub use progress::{default_style, SortProgress, PROGRESS_INTERVAL};
pub use registry::{KnownImage, KnownImageRegistry, KNOWN_PREFIX};
pub use reporting::{write_report, ReportingError, RunReport};
pub use scanner::{collect_images, has_image_extension, normalize_extensions};

#[cfg(feature = "classification")]
pub use classifier::runtime::{init_ort_runtime, ExtractorConfig, OnnxFeatureExtractor, TensorLayout};
