//! OCRS OCR backend implementation.
//!
//! Uses the ocrs crate for pure-Rust OCR without external dependencies.
//! This is a lightweight, CPU-based OCR engine.
//!
//! Models are automatically downloaded on first use from:
//! https://ocrs-models.s3-accelerate.amazonaws.com/

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::backend::{OcrBackend, OcrBackendType, OcrConfig, OcrError, OcrFragment};
use super::model_utils::{ensure_model_file, ModelDirConfig, ModelSpec};

/// Global cached OcrEngine instance (initialized once, reused for all OCR calls).
/// OcrEngine is Send+Sync and its methods take &self, so no Mutex needed.
static OCR_ENGINE: OnceLock<ocrs::OcrEngine> = OnceLock::new();

const MODEL_CONFIG: ModelDirConfig = ModelDirConfig {
    subdir: "ocrs",
    required_files: &["text-detection.rten", "text-recognition.rten"],
};

const DETECTION_MODEL: ModelSpec = ModelSpec {
    url: "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten",
    filename: "text-detection.rten",
    size_hint: "2.5 MB",
};

const RECOGNITION_MODEL: ModelSpec = ModelSpec {
    url: "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten",
    filename: "text-recognition.rten",
    size_hint: "10 MB",
};

/// OCRS OCR backend (pure Rust).
pub struct OcrsBackend {
    config: OcrConfig,
}

impl OcrsBackend {
    /// Create a new OCRS backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: OcrConfig::default(),
        }
    }

    /// Create a new OCRS backend with custom configuration.
    pub fn with_config(config: OcrConfig) -> Self {
        Self { config }
    }

    /// Find the model directory, checking config path and standard locations.
    fn find_model_dir(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.config.model_path {
            if MODEL_CONFIG.has_required_files(path) {
                return Some(path.clone());
            }
        }

        MODEL_CONFIG
            .candidate_dirs()
            .into_iter()
            .find(|dir| MODEL_CONFIG.has_required_files(dir))
    }

    /// Ensure models are downloaded, downloading them if necessary.
    fn ensure_models(&self) -> Result<PathBuf, OcrError> {
        if let Some(dir) = self.find_model_dir() {
            return Ok(dir);
        }

        let model_dir = MODEL_CONFIG.default_dir();
        std::fs::create_dir_all(&model_dir)?;

        ensure_model_file(&DETECTION_MODEL, &model_dir)?;
        ensure_model_file(&RECOGNITION_MODEL, &model_dir)?;

        Ok(model_dir)
    }

    /// Get or initialize the cached OCR engine.
    fn get_or_init_engine(&self) -> Result<&'static ocrs::OcrEngine, OcrError> {
        if let Some(engine) = OCR_ENGINE.get() {
            return Ok(engine);
        }

        let model_dir = self.ensure_models()?;

        let detection_model = rten::Model::load_file(model_dir.join("text-detection.rten"))
            .map_err(|e| {
                OcrError::BackendNotAvailable(format!("Failed to load detection model: {}", e))
            })?;
        let recognition_model = rten::Model::load_file(model_dir.join("text-recognition.rten"))
            .map_err(|e| {
                OcrError::BackendNotAvailable(format!("Failed to load recognition model: {}", e))
            })?;

        let engine = ocrs::OcrEngine::new(ocrs::OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| OcrError::BackendNotAvailable(format!("Failed to create OCR engine: {}", e)))?;

        // Another thread may have won the race; either engine is fine.
        let _ = OCR_ENGINE.set(engine);

        OCR_ENGINE
            .get()
            .ok_or_else(|| OcrError::BackendNotAvailable("Failed to cache OCR engine".to_string()))
    }

    /// Warm the engine so model problems surface at startup, not on row 1.
    pub fn warm_up(&self) -> Result<(), OcrError> {
        self.get_or_init_engine().map(|_| ())
    }
}

impl Default for OcrsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for OcrsBackend {
    fn backend_type(&self) -> OcrBackendType {
        OcrBackendType::Ocrs
    }

    fn is_available(&self) -> bool {
        match self.warm_up() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("OCRS engine unavailable: {}", e);
                false
            }
        }
    }

    fn availability_hint(&self) -> String {
        match self.find_model_dir() {
            Some(path) => format!("OCRS models found at {:?}", path),
            None => format!(
                "OCRS models will be auto-downloaded on first use (~12 MB total) to {:?}",
                MODEL_CONFIG.default_dir()
            ),
        }
    }

    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrFragment>, OcrError> {
        let engine = self.get_or_init_engine()?;

        let img = image::open(image_path)
            .map_err(|e| OcrError::OcrFailed(format!("Failed to load image: {}", e)))?;
        let rgb_img = img.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        let img_source = ocrs::ImageSource::from_bytes(rgb_img.as_raw(), (width, height))
            .map_err(|e| OcrError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let input = engine
            .prepare_input(img_source)
            .map_err(|e| OcrError::OcrFailed(format!("Failed to prepare input: {}", e)))?;

        let text = engine
            .get_text(&input)
            .map_err(|e| OcrError::OcrFailed(format!("Failed to extract text: {}", e)))?;

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(OcrFragment::new)
            .collect())
    }
}
