//! ONNX Runtime feature extractor.
//!
//! The graph is used frozen: its first output (typically the penultimate
//! layer of a pretrained network) becomes the feature vector consumed by the
//! classification head.

use super::{ClassifierError, FeatureExtractor};
use ndarray::{Array, Array4, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::OnceLock;

/// Global flag to track if ORT runtime has been initialized.
static ORT_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the ONNX Runtime from a dynamic library path.
///
/// Idempotent: calls after a successful initialization are no-ops.
pub fn init_ort_runtime(dylib_path: impl AsRef<Path>) -> Result<(), ClassifierError> {
    let path = dylib_path.as_ref();

    if ORT_INITIALIZED.get().is_some() {
        return Ok(());
    }

    if !path.exists() {
        return Err(ClassifierError::Runtime(format!(
            "ONNX Runtime library not found at: {}",
            path.display()
        )));
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| ClassifierError::InvalidPath(path.to_path_buf()))?;

    ort::init_from(path_str)
        .commit()
        .map_err(|e| ClassifierError::Runtime(e.to_string()))?;

    let _ = ORT_INITIALIZED.set(());
    Ok(())
}

/// Tensor layout expected by the graph input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// Channels first, PyTorch style.
    Nchw,
    /// Channels last, TensorFlow style.
    Nhwc,
}

/// Input preprocessing for the feature graph.
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    pub width: i32,
    pub height: i32,
    pub layout: TensorLayout,
    /// Subtracted from every raw 0-255 channel value.
    pub mean: f32,
    /// Applied after the mean subtraction.
    pub scale: f32,
}

impl Default for ExtractorConfig {
    /// Inception-style input: 224x224, channels last, mean 117.
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            layout: TensorLayout::Nhwc,
            mean: 117.0,
            scale: 1.0,
        }
    }
}

pub struct OnnxFeatureExtractor {
    session: Session,
    config: ExtractorConfig,
}

impl OnnxFeatureExtractor {
    pub fn new(model_path: &Path, config: ExtractorConfig) -> Result<Self, ClassifierError> {
        let session = load_session(model_path)?;
        Ok(Self { session, config })
    }
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn extract(&mut self, image_path: &Path) -> Result<Vec<f32>, ClassifierError> {
        let input = preprocess_image(image_path, &self.config)?;

        let input_name = self
            .session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());

        let input_tensor = ort::value::Tensor::from_array(input)
            .map_err(|e| ClassifierError::Runtime(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input_name => input_tensor])
            .map_err(|e| ClassifierError::Runtime(e.to_string()))?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| ClassifierError::Processing("no output tensor found".into()))?;

        // [1, features] or any other shape: flatten everything.
        let (_, features) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Runtime(e.to_string()))?;

        Ok(features.to_vec())
    }
}

fn load_session(model_path: &Path) -> Result<Session, ClassifierError> {
    if !model_path.exists() {
        return Err(ClassifierError::ModelNotFound(model_path.to_path_buf()));
    }

    let model_bytes = std::fs::read(model_path).map_err(|source| ClassifierError::Io {
        path: model_path.to_path_buf(),
        source,
    })?;

    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.with_intra_threads(4))
        .and_then(|builder| builder.commit_from_memory(&model_bytes))
        .map_err(|e| ClassifierError::Runtime(e.to_string()))
}

/// Loads, resizes and offsets an image into a single-item batch tensor.
fn preprocess_image(
    image_path: &Path,
    config: &ExtractorConfig,
) -> Result<Array4<f32>, ClassifierError> {
    use opencv::core::{Mat, MatTraitConst, MatTraitConstManual, Size, Vec3f, CV_32FC3};
    use opencv::imgcodecs;
    use opencv::imgproc;

    let opencv_error = |e: opencv::Error| ClassifierError::Runtime(e.to_string());

    let image = imgcodecs::imread(
        image_path
            .to_str()
            .ok_or_else(|| ClassifierError::InvalidPath(image_path.to_path_buf()))?,
        imgcodecs::IMREAD_COLOR,
    )
    .map_err(opencv_error)?;

    if image.empty() {
        return Err(ClassifierError::InvalidPath(image_path.to_path_buf()));
    }

    let mut resized = Mat::default();
    imgproc::resize(
        &image,
        &mut resized,
        Size::new(config.width, config.height),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(opencv_error)?;

    // Keep the 0-255 range; offset and scale are applied per pixel below.
    let mut float_image = Mat::default();
    resized
        .convert_to(&mut float_image, CV_32FC3, 1.0, 0.0)
        .map_err(opencv_error)?;

    let rows = float_image.rows() as usize;
    let cols = float_image.cols() as usize;

    // OpenCV is BGR; the graph expects RGB.
    let data: Vec<f32> = float_image
        .data_typed::<Vec3f>()
        .map_err(opencv_error)?
        .iter()
        .flat_map(|pixel| [pixel[2], pixel[1], pixel[0]])
        .map(|value| (value - config.mean) * config.scale)
        .collect();

    let hwc = Array::from_shape_vec((rows, cols, 3), data)
        .map_err(|e| ClassifierError::Processing(e.to_string()))?;

    let batch = match config.layout {
        TensorLayout::Nhwc => hwc.insert_axis(Axis(0)),
        TensorLayout::Nchw => hwc.permuted_axes([2, 0, 1]).insert_axis(Axis(0)),
    };
    Ok(batch.as_standard_layout().into_owned())
}
