//! OCR and text extraction module.
//!
//! Extracts text from product images using:
//! - Tesseract OCR via the `tesseract` binary (default)
//! - OCRS for pure-Rust OCR (feature: ocr-ocrs)
//!
//! Backends are created once at startup with [`create_backend`] and shared
//! through [`TextExtractor`], which turns their fragments into one string
//! per image.

mod backend;
mod extractor;
mod model_utils;
mod tesseract;

#[cfg(feature = "ocr-ocrs")]
mod ocrs_backend;

pub use backend::{
    build_backend, create_backend, BoundingBox, OcrBackend, OcrBackendType, OcrConfig, OcrError,
    OcrFragment,
};
pub use extractor::{join_fragments, TextExtractor};
pub use tesseract::TesseractBackend;

#[cfg(feature = "ocr-ocrs")]
pub use ocrs_backend::OcrsBackend;
