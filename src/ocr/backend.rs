//! OCR backend abstraction.
//!
//! Supports multiple OCR engines behind one trait:
//! - Tesseract: Traditional OCR via command-line (CPU)
//! - Ocrs: Pure Rust OCR engine (CPU, feature `ocr-ocrs`)
//!
//! Backends return recognized fragments in reading order. Flattening them
//! into a single string is the job of [`TextExtractor`](super::TextExtractor).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from OCR backends.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine could not be initialized (missing binary, missing models).
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    /// The engine ran but could not process this image.
    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Not an image: {path} (detected {detected})")]
    NotAnImage { path: PathBuf, detected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel-space bounding box of a recognized fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        // Extents saturate; TSV coordinates are not trusted.
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }

    fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }
}

/// One piece of recognized text (typically a line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrFragment {
    pub text: String,
    /// Confidence score (0.0 - 1.0), if the engine reports one.
    pub confidence: Option<f32>,
    pub bbox: Option<BoundingBox>,
}

impl OcrFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            bbox: None,
        }
    }
}

/// Available OCR backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackendType {
    /// Tesseract OCR via command-line.
    Tesseract,
    /// Pure Rust OCR engine (ocrs crate).
    Ocrs,
}

impl OcrBackendType {
    pub const ALL: [OcrBackendType; 2] = [OcrBackendType::Tesseract, OcrBackendType::Ocrs];

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrBackendType::Tesseract => "tesseract",
            OcrBackendType::Ocrs => "ocrs",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tesseract" => Some(OcrBackendType::Tesseract),
            "ocrs" => Some(OcrBackendType::Ocrs),
            _ => None,
        }
    }
}

impl std::fmt::Display for OcrBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for OCR backends.
///
/// Implementations are created once at startup and shared read-only across
/// the whole run, so `recognize` takes `&self`.
pub trait OcrBackend: Send + Sync {
    /// Get the backend type.
    fn backend_type(&self) -> OcrBackendType;

    /// Check if this backend is available (dependencies installed, models present).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this backend available.
    fn availability_hint(&self) -> String;

    /// Recognize text fragments in an image file, in reading order.
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrFragment>, OcrError>;
}

/// Configuration for OCR backends.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Language for OCR (e.g., "eng", "deu").
    pub language: String,
    /// Path to model files (for backends that need them).
    pub model_path: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            model_path: None,
        }
    }
}

/// Construct a backend without checking availability.
pub fn build_backend(backend_type: OcrBackendType, config: OcrConfig) -> Option<Arc<dyn OcrBackend>> {
    match backend_type {
        OcrBackendType::Tesseract => Some(Arc::new(super::TesseractBackend::with_config(config))),
        #[cfg(feature = "ocr-ocrs")]
        OcrBackendType::Ocrs => Some(Arc::new(super::OcrsBackend::with_config(config))),
        #[cfg(not(feature = "ocr-ocrs"))]
        OcrBackendType::Ocrs => None,
    }
}

/// Construct a backend and verify it can run.
///
/// Fails with [`OcrError::BackendNotAvailable`] when the engine is missing;
/// callers treat that as fatal before any row is processed.
pub fn create_backend(
    backend_type: OcrBackendType,
    config: OcrConfig,
) -> Result<Arc<dyn OcrBackend>, OcrError> {
    let backend = build_backend(backend_type, config).ok_or_else(|| {
        OcrError::BackendNotAvailable(format!(
            "{} support not compiled in (rebuild with --features ocr-{})",
            backend_type, backend_type
        ))
    })?;

    if !backend.is_available() {
        return Err(OcrError::BackendNotAvailable(backend.availability_hint()));
    }

    tracing::debug!("OCR backend ready: {}", backend_type);
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_round_trip_names() {
        for t in OcrBackendType::ALL {
            assert_eq!(OcrBackendType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(OcrBackendType::from_str("TESSERACT"), Some(OcrBackendType::Tesseract));
        assert_eq!(OcrBackendType::from_str("easyocr"), None);
    }

    #[test]
    fn test_bbox_union() {
        let a = BoundingBox { left: 10, top: 10, width: 20, height: 5 };
        let b = BoundingBox { left: 35, top: 8, width: 10, height: 10 };
        assert_eq!(
            a.union(&b),
            BoundingBox { left: 10, top: 8, width: 35, height: 10 }
        );
    }

    #[test]
    fn test_bbox_union_saturates_at_u32_max() {
        let a = BoundingBox { left: u32::MAX - 5, top: 0, width: 100, height: 4 };
        let b = BoundingBox { left: 0, top: u32::MAX, width: 1, height: u32::MAX };
        let union = a.union(&b);
        assert_eq!(union.left, 0);
        assert_eq!(union.width, u32::MAX);
        assert_eq!(union.top, 0);
        assert_eq!(union.height, u32::MAX);
    }
}
