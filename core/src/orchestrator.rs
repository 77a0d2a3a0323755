//! Load-or-train orchestration and the sorting run built from settings.

use crate::classifier::{ClassifierError, ImageClassifier, TrainableClassifier};
use crate::config::{AssetLayout, Settings};
use crate::dataset::{DatasetError, DatasetSplitter, SplitOutcome};
use crate::engine::{SortConfig, SortEngine, SortError, SortObserver, SortResult};
use crate::logger::{LogError, RunLog};
use crate::registry::KnownImageRegistry;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Sort(#[from] SortError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("failed to enumerate known images in {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub struct Pipeline {
    layout: AssetLayout,
    settings: Settings,
}

impl Pipeline {
    pub fn new(layout: AssetLayout, settings: Settings) -> Self {
        Self { layout, settings }
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Loads the configured model, or trains a new one, and returns the
    /// registry of images the model already knows. Sort settings are
    /// validated first so a bad threshold fails before any training.
    pub fn prepare<C>(
        &self,
        classifier: &mut C,
        log: &RunLog,
    ) -> Result<KnownImageRegistry, PipelineError>
    where
        C: TrainableClassifier,
    {
        SortEngine::new(self.sort_config())?;
        match self.settings.load_model() {
            Some(model) => self.load_existing(classifier, model, log),
            None => self.train_best(classifier, log),
        }
    }

    fn load_existing<C>(
        &self,
        classifier: &mut C,
        model: &str,
        log: &RunLog,
    ) -> Result<KnownImageRegistry, PipelineError>
    where
        C: TrainableClassifier,
    {
        log.log(&format!("Loading model - {}", model), true)?;
        classifier.load(&self.layout.resolve(model))?;

        log.log("Collecting training images...", true)?;
        let images = self.layout.images_dir();
        KnownImageRegistry::scan(&images, classifier.extensions())
            .map_err(|source| PipelineError::Walk { path: images, source })
    }

    /// Retrains `TryCount` times. Each strictly better log-loss is saved when
    /// `SaveModel` is set; the best saved model is restored at the end.
    fn train_best<C>(
        &self,
        classifier: &mut C,
        log: &RunLog,
    ) -> Result<KnownImageRegistry, PipelineError>
    where
        C: TrainableClassifier,
    {
        let attempts = self.settings.try_count();
        let save_path = self.settings.save_model().map(|model| self.layout.resolve(model));
        log.log(&format!("Creating model with {} attempts...", attempts), true)?;

        let mut best_loss = f64::MAX;
        let mut best_attempt = None;
        let mut last_split = SplitOutcome::default();

        for attempt in 1..=attempts {
            log.log(&format!("Attempt {}", attempt), true)?;
            let split = self.splitter(classifier, attempt).split(
                &self.layout.images_dir(),
                &self.layout.train_manifest(),
                &self.layout.test_manifest(),
            )?;
            let metrics = classifier.train(&split)?;
            log.log(&format!("LogLoss = {}", metrics.log_loss), true)?;

            if metrics.log_loss < best_loss {
                best_loss = metrics.log_loss;
                best_attempt = Some(attempt);
                if let Some(path) = &save_path {
                    log.log(
                        &format!("Saving model - {} with LogLoss = {}", path.display(), best_loss),
                        true,
                    )?;
                    classifier.save(path)?;
                }
                log.log(&metrics.summary(), true)?;
            }
            last_split = split;
        }

        if let (Some(best), Some(path)) = (best_attempt, &save_path) {
            if best != attempts {
                log.log(&format!("Restoring model from attempt {}", best), true)?;
                classifier.load(path)?;
            }
        }

        Ok(KnownImageRegistry::from_paths(last_split.all_paths()))
    }

    fn splitter<C: ImageClassifier>(&self, classifier: &C, attempt: u32) -> DatasetSplitter {
        let splitter = DatasetSplitter::new(classifier.extensions())
            .with_test_fraction(self.settings.test_fraction());
        match self.settings.seed() {
            Some(seed) => splitter.with_seed(seed.wrapping_add(u64::from(attempt - 1))),
            None => splitter,
        }
    }

    pub fn sort_config(&self) -> SortConfig {
        SortConfig {
            source: self.layout.source_dir(&self.settings),
            destination: self.layout.result_dir(),
            limit: self.settings.result_limit(),
            min_score: self.settings.max_score_limit(),
        }
    }

    pub fn sort<C>(
        &self,
        classifier: &Mutex<C>,
        registry: &KnownImageRegistry,
        observer: &mut dyn SortObserver,
    ) -> Result<SortResult, PipelineError>
    where
        C: ImageClassifier + ?Sized,
    {
        let engine = SortEngine::new(self.sort_config())?;
        Ok(engine.run(classifier, registry, observer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Prediction, TrainingMetrics};
    use crate::engine::NoopObserver;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Returns scripted losses per training attempt and records persistence calls.
    struct ScriptedClassifier {
        extensions: Vec<String>,
        losses: Vec<f64>,
        attempt: usize,
        current: Option<f64>,
        saved: RefCell<Vec<f64>>,
        loads: usize,
    }

    impl ScriptedClassifier {
        fn new(losses: &[f64]) -> Self {
            Self {
                extensions: vec![String::from("jpg")],
                losses: losses.to_vec(),
                attempt: 0,
                current: None,
                saved: RefCell::new(Vec::new()),
                loads: 0,
            }
        }
    }

    impl ImageClassifier for ScriptedClassifier {
        fn extensions(&self) -> &[String] {
            &self.extensions
        }

        fn is_ready(&self) -> bool {
            self.current.is_some()
        }

        fn classify(&mut self, image_path: &Path) -> Result<Prediction, ClassifierError> {
            Ok(Prediction {
                image_path: image_path.to_path_buf(),
                predicted_label: Some(String::from("cat")),
                scores: vec![0.9, 0.1],
            })
        }
    }

    impl TrainableClassifier for ScriptedClassifier {
        fn train(&mut self, _dataset: &SplitOutcome) -> Result<TrainingMetrics, ClassifierError> {
            let loss = self.losses[self.attempt];
            self.attempt += 1;
            self.current = Some(loss);
            Ok(TrainingMetrics {
                log_loss: loss,
                ..TrainingMetrics::default()
            })
        }

        fn save(&self, path: &Path) -> Result<(), ClassifierError> {
            let loss = self.current.ok_or(ClassifierError::NotReady)?;
            fs::write(path, loss.to_string()).map_err(|source| ClassifierError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            self.saved.borrow_mut().push(loss);
            Ok(())
        }

        fn load(&mut self, path: &Path) -> Result<(), ClassifierError> {
            let content = fs::read_to_string(path)
                .map_err(|_| ClassifierError::ModelNotFound(path.to_path_buf()))?;
            self.current = content.parse().ok();
            self.loads += 1;
            Ok(())
        }
    }

    fn assets(config: &str) -> (TempDir, Pipeline, RunLog) {
        let dir = tempdir().unwrap();
        let layout = AssetLayout::new(dir.path());
        for label in ["cat", "dog"] {
            let folder = layout.images_dir().join(label);
            fs::create_dir_all(&folder).unwrap();
            for index in 0..5 {
                fs::write(folder.join(format!("{}{}.jpg", label, index)), b"image").unwrap();
            }
        }
        let log = RunLog::create(layout.log_file()).unwrap();
        let settings = Settings::parse(&format!("MaxScoreLimit=0.5\n{}", config));
        let pipeline = Pipeline::new(layout, settings);
        (dir, pipeline, log)
    }

    #[test]
    fn training_saves_each_improvement_and_restores_the_best() {
        let (_dir, pipeline, log) = assets("TryCount=3\nSaveModel=model.txt\nSeed=1\n");
        let mut classifier = ScriptedClassifier::new(&[0.8, 0.3, 0.5]);

        let registry = pipeline.prepare(&mut classifier, &log).unwrap();

        assert_eq!(*classifier.saved.borrow(), vec![0.8, 0.3]);
        assert_eq!(classifier.loads, 1);
        assert_eq!(classifier.current, Some(0.3));
        assert_eq!(registry.len(), 10);
        assert!(pipeline.layout().train_manifest().exists());
        assert!(pipeline.layout().test_manifest().exists());
        let logged = fs::read_to_string(log.path()).unwrap();
        assert!(logged.contains("Attempt 3"));
        assert!(logged.contains("Restoring model from attempt 2"));
    }

    #[test]
    fn last_attempt_being_best_needs_no_restore() {
        let (_dir, pipeline, log) = assets("TryCount=2\nSaveModel=model.txt\n");
        let mut classifier = ScriptedClassifier::new(&[0.8, 0.2]);
        pipeline.prepare(&mut classifier, &log).unwrap();
        assert_eq!(classifier.loads, 0);
        assert_eq!(*classifier.saved.borrow(), vec![0.8, 0.2]);
    }

    #[test]
    fn training_without_save_path_keeps_last_model() {
        let (_dir, pipeline, log) = assets("");
        let mut classifier = ScriptedClassifier::new(&[0.4, 0.6, 0.9]);
        pipeline.prepare(&mut classifier, &log).unwrap();
        assert_eq!(classifier.attempt, 3);
        assert!(classifier.saved.borrow().is_empty());
        assert_eq!(classifier.current, Some(0.9));
    }

    #[test]
    fn loading_registers_every_image_under_images() {
        let (dir, pipeline, log) = assets("LoadModel=model.txt\n");
        fs::write(dir.path().join("model.txt"), "0.25").unwrap();
        let mut classifier = ScriptedClassifier::new(&[]);

        let registry = pipeline.prepare(&mut classifier, &log).unwrap();
        assert_eq!(classifier.current, Some(0.25));
        assert_eq!(classifier.attempt, 0);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn missing_model_is_fatal() {
        let (_dir, pipeline, log) = assets("LoadModel=absent.txt\n");
        let mut classifier = ScriptedClassifier::new(&[]);
        let result = pipeline.prepare(&mut classifier, &log);
        assert!(matches!(
            result,
            Err(PipelineError::Classifier(ClassifierError::ModelNotFound(_)))
        ));
    }

    #[test]
    fn sort_config_comes_from_settings() {
        let (_dir, pipeline, _log) =
            assets("SourseImages=/incoming\nResultImagesCount=4\nMaxScoreLimit=0,6\n");
        let config = pipeline.sort_config();
        assert_eq!(config.source, PathBuf::from("/incoming"));
        assert_eq!(config.destination, pipeline.layout().result_dir());
        assert_eq!(config.limit, Some(4));
        assert!((config.min_score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn invalid_threshold_fails_before_training() {
        let (_dir, pipeline, log) = assets("MaxScoreLimit=1.5\n");
        let mut classifier = ScriptedClassifier::new(&[0.1, 0.1, 0.1]);

        let result = pipeline.prepare(&mut classifier, &log);
        assert!(matches!(
            result,
            Err(PipelineError::Sort(SortError::InvalidThreshold(_)))
        ));
        assert_eq!(classifier.attempt, 0);
        assert!(!pipeline.layout().train_manifest().exists());
        assert!(!pipeline.layout().result_dir().join("cat").exists());
    }

    #[test]
    fn invalid_threshold_aborts_sorting_before_any_copy() {
        let (_dir, pipeline, _log) = assets("MaxScoreLimit=abc\n");
        let classifier = Mutex::new(ScriptedClassifier::new(&[]));

        let result = pipeline.sort(&classifier, &KnownImageRegistry::default(), &mut NoopObserver);
        assert!(matches!(
            result,
            Err(PipelineError::Sort(SortError::InvalidThreshold(_)))
        ));
        assert!(!pipeline.layout().result_dir().join("cat").exists());
    }

    #[test]
    fn test_fraction_setting_sizes_the_test_manifest() {
        let (_dir, pipeline, log) =
            assets("MaxScoreLimit=0.5\nTryCount=1\nTestFraction=0.5\nSeed=7\n");
        let mut classifier = ScriptedClassifier::new(&[0.1]);
        pipeline.prepare(&mut classifier, &log).unwrap();

        let test_rows = crate::dataset::read_manifest(&pipeline.layout().test_manifest()).unwrap();
        assert_eq!(test_rows.len(), 5);
    }

    #[test]
    fn sorting_copies_into_result_with_known_prefix() {
        let (_dir, pipeline, log) = assets("MaxScoreLimit=0.5\nTryCount=1\n");
        let mut classifier = ScriptedClassifier::new(&[0.1]);
        let registry = pipeline.prepare(&mut classifier, &log).unwrap();

        let result = pipeline
            .sort(&Mutex::new(classifier), &registry, &mut NoopObserver)
            .unwrap();
        assert_eq!(result.total, 10);
        assert_eq!(result.accepted, 10);
        let cat_folder = pipeline.layout().result_dir().join("cat");
        assert!(cat_folder.join("known_cat0.jpg").exists());
        assert!(cat_folder.join("dog0.jpg").exists());
    }
}
