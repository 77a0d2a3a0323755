use labelsort_core::{
    ClassifierError, ImageClassifier, KnownImageRegistry, Prediction, SortConfig, SortEngine,
    SortObserver, SortProgress,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::tempdir;

/// Labels everything "cat" with a single class score: 0.95 for names in
/// `confident`, 0.3 for the rest. Names in `failing` raise an error.
struct MockClassifier {
    extensions: Vec<String>,
    confident: HashSet<String>,
    failing: HashSet<String>,
}

impl MockClassifier {
    fn new(confident: &[String], failing: &[String]) -> Self {
        Self {
            extensions: vec![String::from("jpg"), String::from("png")],
            confident: confident.iter().cloned().collect(),
            failing: failing.iter().cloned().collect(),
        }
    }
}

impl ImageClassifier for MockClassifier {
    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn classify(&mut self, image_path: &Path) -> Result<Prediction, ClassifierError> {
        let name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(ClassifierError::InvalidPath(image_path.to_path_buf()));
        }
        let score = if self.confident.contains(&name) { 0.95 } else { 0.3 };
        Ok(Prediction {
            image_path: image_path.to_path_buf(),
            predicted_label: Some(String::from("cat")),
            scores: vec![score],
        })
    }
}

#[derive(Default)]
struct Recorder {
    progress: Vec<SortProgress>,
    predictions: usize,
}

impl SortObserver for Recorder {
    fn on_progress(&mut self, progress: SortProgress) {
        self.progress.push(progress);
    }

    fn on_prediction(&mut self, _prediction: &Prediction) {
        self.predictions += 1;
    }
}

fn twenty_images(source: &Path) -> Vec<String> {
    fs::create_dir_all(source).unwrap();
    (0..20)
        .map(|index| {
            let name = format!("photo{:02}.jpg", index);
            fs::write(source.join(&name), name.as_bytes()).unwrap();
            name
        })
        .collect()
}

fn engine(source: &Path, destination: &Path) -> SortEngine {
    SortEngine::new(SortConfig {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        limit: Some(10),
        min_score: 0.5,
    })
    .unwrap()
}

fn copied_names(folder: &Path) -> HashSet<String> {
    fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect()
}

#[test]
fn confident_images_are_copied_into_label_folder() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("incoming");
    let dest = dir.path().join("result");
    let names = twenty_images(&source);
    let confident: Vec<String> = names.iter().step_by(4).cloned().collect();
    assert_eq!(confident.len(), 5);

    let classifier = Mutex::new(MockClassifier::new(&confident, &[]));
    let mut recorder = Recorder::default();
    let result = engine(&source, &dest)
        .run(&classifier, &KnownImageRegistry::default(), &mut recorder)
        .unwrap();

    assert_eq!(
        copied_names(&dest.join("cat")),
        confident.into_iter().collect::<HashSet<_>>()
    );
    assert_eq!(recorder.predictions, 5);
    assert_eq!(
        recorder.progress.last(),
        Some(&SortProgress {
            total: 20,
            processed: 20,
            accepted: 5
        })
    );
    assert_eq!(result.accepted, 5);
}

#[test]
fn classification_failure_skips_only_that_image() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("incoming");
    let dest = dir.path().join("result");
    let names = twenty_images(&source);
    let confident: Vec<String> = names.iter().step_by(4).cloned().collect();
    let failing = vec![names[1].clone()];

    let classifier = Mutex::new(MockClassifier::new(&confident, &failing));
    let mut recorder = Recorder::default();
    let result = engine(&source, &dest)
        .run(&classifier, &KnownImageRegistry::default(), &mut recorder)
        .unwrap();

    assert_eq!(result.processed, 20);
    assert_eq!(result.accepted, 5);
    assert_eq!(result.failed, 1);
    assert_eq!(recorder.progress.last().map(|p| p.processed), Some(20));
}

#[test]
fn image_matching_known_entry_is_copied_with_known_prefix() {
    let dir = tempdir().unwrap();
    let known = dir.path().join("images/cat/img1.jpg");
    fs::create_dir_all(known.parent().unwrap()).unwrap();
    fs::write(&known, b"same bytes").unwrap();

    let source = dir.path().join("incoming/batch");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("img1.jpg"), b"same bytes").unwrap();
    let dest = dir.path().join("result");

    let registry = KnownImageRegistry::from_paths([&known]);
    let classifier = Mutex::new(MockClassifier::new(&[String::from("img1.jpg")], &[]));
    engine(&source, &dest)
        .run(&classifier, &registry, &mut Recorder::default())
        .unwrap();

    let folder = dest.join("cat");
    assert_eq!(
        copied_names(&folder),
        HashSet::from([String::from("known_img1.jpg")])
    );
    assert_eq!(fs::read(&known).unwrap(), b"same bytes");
    assert_eq!(
        fs::read(folder.join("known_img1.jpg")).unwrap(),
        fs::read(PathBuf::from(&known)).unwrap()
    );
}
