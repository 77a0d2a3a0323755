//! Nearest-centroid classification head over frozen image features.

use super::{
    softmax, ClassifierError, FeatureExtractor, ImageClassifier, Prediction,
    TrainableClassifier, TrainingMetrics, DEFAULT_EXTENSIONS,
};
use crate::dataset::{LabeledImage, SplitOutcome};
use crate::scanner::normalize_extensions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Multiplier applied to cosine similarities before the softmax.
pub const SCORE_SHARPNESS: f32 = 10.0;

/// Lower bound for probabilities fed into the log-loss.
const MIN_PROBABILITY: f64 = 1e-15;

const MODEL_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CentroidModel {
    version: u32,
    labels: Vec<String>,
    centroids: Vec<Vec<f32>>,
}

impl CentroidModel {
    fn dimension(&self) -> usize {
        self.centroids.first().map(Vec::len).unwrap_or(0)
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.labels.is_empty() || self.labels.len() != self.centroids.len() {
            return Err(ClassifierError::Processing(format!(
                "model has {} labels and {} centroids",
                self.labels.len(),
                self.centroids.len()
            )));
        }
        let expected = self.dimension();
        for centroid in &self.centroids {
            if centroid.len() != expected {
                return Err(ClassifierError::DimensionMismatch {
                    expected,
                    found: centroid.len(),
                });
            }
        }
        Ok(())
    }

    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if features.len() != self.dimension() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.dimension(),
                found: features.len(),
            });
        }
        let similarities: Vec<f32> = self
            .centroids
            .iter()
            .map(|centroid| dot(centroid, features) * SCORE_SHARPNESS)
            .collect();
        Ok(softmax(&similarities))
    }
}

/// Averages L2-normalised training features per label and scores new images
/// by their cosine similarity to each label's centroid.
pub struct CentroidClassifier<E> {
    extractor: E,
    extensions: Vec<String>,
    model: Option<CentroidModel>,
}

impl<E: FeatureExtractor> CentroidClassifier<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            extensions: normalize_extensions(DEFAULT_EXTENSIONS),
            model: None,
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = normalize_extensions(extensions);
        self
    }

    /// Known labels in score order.
    pub fn labels(&self) -> &[String] {
        self.model
            .as_ref()
            .map(|model| model.labels.as_slice())
            .unwrap_or(&[])
    }

    fn features(&mut self, image_path: &Path) -> Result<Vec<f32>, ClassifierError> {
        let mut features = self.extractor.extract(image_path)?;
        normalize(&mut features);
        Ok(features)
    }

    fn fit(&mut self, images: &[LabeledImage]) -> Result<CentroidModel, ClassifierError> {
        let mut sums: BTreeMap<String, (Vec<f32>, usize)> = BTreeMap::new();
        let mut dimension: Option<usize> = None;

        for image in images {
            let Ok(features) = self.features(&image.path) else {
                continue;
            };
            let expected = *dimension.get_or_insert(features.len());
            if features.len() != expected {
                return Err(ClassifierError::DimensionMismatch {
                    expected,
                    found: features.len(),
                });
            }
            let (sum, count) = sums
                .entry(image.label.clone())
                .or_insert_with(|| (vec![0.0; expected], 0));
            sum.iter_mut().zip(&features).for_each(|(acc, value)| *acc += value);
            *count += 1;
        }

        if sums.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }

        let mut labels = Vec::with_capacity(sums.len());
        let mut centroids = Vec::with_capacity(sums.len());
        for (label, (mut sum, count)) in sums {
            sum.iter_mut().for_each(|value| *value /= count as f32);
            normalize(&mut sum);
            labels.push(label);
            centroids.push(sum);
        }

        Ok(CentroidModel {
            version: MODEL_VERSION,
            labels,
            centroids,
        })
    }

    fn evaluate(&mut self, images: &[LabeledImage]) -> TrainingMetrics {
        let Some(labels) = self.model.as_ref().map(|model| model.labels.clone()) else {
            return TrainingMetrics::default();
        };
        let mut class_losses: Vec<Vec<f64>> = vec![Vec::new(); labels.len()];
        let mut losses = Vec::new();
        let mut test_predictions = Vec::new();

        for image in images {
            let Ok(prediction) = self.classify(&image.path) else {
                continue;
            };
            let class_index = labels.iter().position(|label| label == &image.label);
            let probability = class_index
                .and_then(|index| prediction.scores.get(index))
                .map(|score| f64::from(*score))
                .unwrap_or(0.0);
            let loss = -probability.max(MIN_PROBABILITY).ln();
            if let Some(index) = class_index {
                class_losses[index].push(loss);
            }
            losses.push(loss);
            test_predictions.push(prediction);
        }

        TrainingMetrics {
            log_loss: mean(&losses).unwrap_or(f64::INFINITY),
            per_class_log_loss: class_losses
                .iter()
                .map(|losses| mean(losses).unwrap_or(0.0))
                .collect(),
            test_predictions,
        }
    }
}

impl<E: FeatureExtractor> ImageClassifier for CentroidClassifier<E> {
    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn classify(&mut self, image_path: &Path) -> Result<Prediction, ClassifierError> {
        if self.model.is_none() {
            return Err(ClassifierError::NotReady);
        }
        let features = self.features(image_path)?;
        let model = self.model.as_ref().ok_or(ClassifierError::NotReady)?;
        let scores = model.scores(&features)?;
        let predicted_label = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(index, _)| model.labels.get(index).cloned());
        Ok(Prediction {
            image_path: image_path.to_path_buf(),
            predicted_label,
            scores,
        })
    }
}

impl<E: FeatureExtractor> TrainableClassifier for CentroidClassifier<E> {
    fn train(&mut self, dataset: &SplitOutcome) -> Result<TrainingMetrics, ClassifierError> {
        let model = self.fit(&dataset.train)?;
        self.model = Some(model);
        Ok(self.evaluate(&dataset.test))
    }

    fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotReady)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ClassifierError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), model)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: CentroidModel = serde_json::from_reader(BufReader::new(file))?;
        model.validate()?;
        self.model = Some(model);
        Ok(())
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn normalize(values: &mut [f32]) {
    let norm = dot(values, values).sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|value| *value /= norm);
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
