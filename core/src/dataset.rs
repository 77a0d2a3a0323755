//! Train/test partitioning of a labelled image tree.
//!
//! Every recognized image below the root is labelled with the name of the
//! folder that contains it. A random subset becomes the test partition and
//! both partitions are written as tab-delimited `path<TAB>label` manifests.

use crate::scanner::{collect_images, normalize_extensions};
use csv::{ReaderBuilder, WriterBuilder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Share of the labelled images drawn into the test partition.
pub const DEFAULT_TEST_FRACTION: f64 = 0.1;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to enumerate {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("manifest error for {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed manifest line {line} in {}", path.display())]
    MalformedRecord { path: PathBuf, line: u64 },
}

/// An image path together with the label taken from its parent folder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
}

impl LabeledImage {
    /// Labels `path` with its immediate parent directory name.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let label = path.parent()?.file_name()?.to_str()?.to_string();
        Some(Self { path, label })
    }
}

/// Result of one split: the two disjoint partitions and where they were written.
#[derive(Clone, Debug, Default)]
pub struct SplitOutcome {
    pub train: Vec<LabeledImage>,
    pub test: Vec<LabeledImage>,
    pub train_manifest: PathBuf,
    pub test_manifest: PathBuf,
}

impl SplitOutcome {
    pub fn train_paths(&self) -> Vec<PathBuf> {
        self.train.iter().map(|image| image.path.clone()).collect()
    }

    /// Paths of both partitions, training first.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        self.train
            .iter()
            .chain(self.test.iter())
            .map(|image| image.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.test.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct DatasetSplitter {
    extensions: Vec<String>,
    test_fraction: f64,
    seed: Option<u64>,
}

impl DatasetSplitter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: normalize_extensions(extensions),
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: None,
        }
    }

    pub fn with_test_fraction(mut self, fraction: f64) -> Self {
        self.test_fraction = fraction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Number of test items for `total` labelled images.
    pub fn test_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        let raw = (total as f64 * self.test_fraction).floor() as usize;
        raw.max(1).min(total)
    }

    pub fn collect_labeled(&self, root: &Path) -> Result<Vec<LabeledImage>, DatasetError> {
        let images = collect_images(root, &self.extensions).map_err(|source| {
            DatasetError::Walk {
                root: root.to_path_buf(),
                source,
            }
        })?;
        Ok(images.into_iter().filter_map(LabeledImage::from_path).collect())
    }

    /// Splits the images under `root` and overwrites both manifests.
    ///
    /// Test items are drawn uniformly by index, redrawing on repeats, until
    /// the test partition is full; the rest stay in enumeration order as the
    /// training partition. An empty tree yields empty partitions.
    pub fn split(
        &self,
        root: &Path,
        train_manifest: &Path,
        test_manifest: &Path,
    ) -> Result<SplitOutcome, DatasetError> {
        let labeled = self.collect_labeled(root)?;
        let total = labeled.len();
        let test_count = self.test_count(total);

        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut drawn = vec![false; total];
        let mut test_indices = Vec::with_capacity(test_count);
        while test_indices.len() < test_count {
            let index = rng.gen_range(0..total);
            if !drawn[index] {
                drawn[index] = true;
                test_indices.push(index);
            }
        }

        let test: Vec<LabeledImage> = test_indices
            .iter()
            .map(|&index| labeled[index].clone())
            .collect();
        let train: Vec<LabeledImage> = labeled
            .into_iter()
            .zip(drawn)
            .filter(|(_, in_test)| !in_test)
            .map(|(image, _)| image)
            .collect();

        write_manifest(train_manifest, &train)?;
        write_manifest(test_manifest, &test)?;

        Ok(SplitOutcome {
            train,
            test,
            train_manifest: train_manifest.to_path_buf(),
            test_manifest: test_manifest.to_path_buf(),
        })
    }
}

pub fn write_manifest(path: &Path, images: &[LabeledImage]) -> Result<(), DatasetError> {
    let manifest_error = |source| DatasetError::Manifest {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(manifest_error)?;
    for image in images {
        let image_path = image.path.to_string_lossy();
        writer
            .write_record([image_path.as_ref(), image.label.as_str()])
            .map_err(manifest_error)?;
    }
    writer
        .flush()
        .map_err(|error| manifest_error(csv::Error::from(error)))
}

pub fn read_manifest(path: &Path) -> Result<Vec<LabeledImage>, DatasetError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(|source| DatasetError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

    let mut images = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| DatasetError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        match (record.get(0), record.get(1)) {
            (Some(image_path), Some(label)) if record.len() == 2 => images.push(LabeledImage {
                path: PathBuf::from(image_path.trim()),
                label: label.trim().to_string(),
            }),
            _ => {
                return Err(DatasetError::MalformedRecord {
                    path: path.to_path_buf(),
                    line,
                })
            }
        }
    }
    Ok(images)
}
