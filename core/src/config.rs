//! Run settings and the assets directory convention.
//!
//! Settings come from a flat `key = value` text file. Values stay raw strings
//! until an accessor interprets them, so each accessor owns its fallback.

use crate::dataset::DEFAULT_TEST_FRACTION;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.txt";
pub const IMAGES_DIR_NAME: &str = "images";
pub const RESULT_DIR_NAME: &str = "result";
pub const LOG_FILE_NAME: &str = "log.txt";
pub const REPORT_FILE_NAME: &str = "report.json";
pub const TRAIN_MANIFEST_NAME: &str = "tags.tsv";
pub const TEST_MANIFEST_NAME: &str = "tags_test.tsv";
pub const DEFAULT_FEATURE_MODEL: &str = "inception/feature_extractor.onnx";

/// Training attempts used when `TryCount` is missing, unparsable or zero.
pub const DEFAULT_TRY_COUNT: u32 = 3;

pub const KEY_LOAD_MODEL: &str = "LoadModel";
pub const KEY_SAVE_MODEL: &str = "SaveModel";
pub const KEY_TRY_COUNT: &str = "TryCount";
pub const KEY_SOURCE_IMAGES: &str = "SourseImages";
pub const KEY_RESULT_COUNT: &str = "ResultImagesCount";
pub const KEY_MAX_SCORE: &str = "MaxScoreLimit";
pub const KEY_FEATURE_MODEL: &str = "FeatureModel";
pub const KEY_ORT_LIBRARY: &str = "OrtLibrary";
pub const KEY_SEED: &str = "Seed";
pub const KEY_TEST_FRACTION: &str = "TestFraction";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw setting name to value mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parses `key = value` lines. Blank lines, `#` comments and lines that do
    /// not contain exactly one `=` are ignored; a repeated key keeps its last value.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('=').collect();
            if let [key, value] = parts.as_slice() {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn load_model(&self) -> Option<&str> {
        self.non_empty(KEY_LOAD_MODEL)
    }

    pub fn save_model(&self) -> Option<&str> {
        self.non_empty(KEY_SAVE_MODEL)
    }

    pub fn try_count(&self) -> u32 {
        self.get(KEY_TRY_COUNT)
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_TRY_COUNT)
    }

    pub fn source_images(&self) -> Option<&str> {
        self.non_empty(KEY_SOURCE_IMAGES)
    }

    /// Maximum number of useful images to copy. Zero, negative and
    /// unparsable values all mean "no limit".
    pub fn result_limit(&self) -> Option<usize> {
        self.get(KEY_RESULT_COUNT)
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|limit| *limit > 0)
            .and_then(|limit| usize::try_from(limit).ok())
    }

    /// Acceptance threshold; either `.` or `,` may be the decimal separator.
    /// Unparsable values yield 0.0, which the sorting engine rejects.
    pub fn max_score_limit(&self) -> f32 {
        self.get(KEY_MAX_SCORE)
            .and_then(|value| value.replace(',', ".").parse::<f32>().ok())
            .unwrap_or(0.0)
    }

    pub fn feature_model(&self) -> &str {
        self.non_empty(KEY_FEATURE_MODEL)
            .unwrap_or(DEFAULT_FEATURE_MODEL)
    }

    pub fn ort_library(&self) -> Option<&str> {
        self.non_empty(KEY_ORT_LIBRARY)
    }

    pub fn seed(&self) -> Option<u64> {
        self.get(KEY_SEED).and_then(|value| value.parse().ok())
    }

    /// Share of labelled images held out for evaluation, within `(0, 1)`.
    pub fn test_fraction(&self) -> f64 {
        self.get(KEY_TEST_FRACTION)
            .and_then(|value| value.replace(',', ".").parse::<f64>().ok())
            .filter(|fraction| *fraction > 0.0 && *fraction < 1.0)
            .unwrap_or(DEFAULT_TEST_FRACTION)
    }
}

/// Directory convention rooted at the assets folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetLayout {
    pub root: PathBuf,
}

impl AssetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR_NAME)
    }

    pub fn result_dir(&self) -> PathBuf {
        self.root.join(RESULT_DIR_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.result_dir().join(LOG_FILE_NAME)
    }

    pub fn report_file(&self) -> PathBuf {
        self.result_dir().join(REPORT_FILE_NAME)
    }

    pub fn train_manifest(&self) -> PathBuf {
        self.images_dir().join(TRAIN_MANIFEST_NAME)
    }

    pub fn test_manifest(&self) -> PathBuf {
        self.images_dir().join(TEST_MANIFEST_NAME)
    }

    /// Resolves a model or asset path; relative paths are taken from the assets root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Directory to sort from. A configured relative path is taken from the
    /// working directory; without a setting the labelled images folder is used.
    pub fn source_dir(&self, settings: &Settings) -> PathBuf {
        settings
            .source_images()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.images_dir())
    }
}
