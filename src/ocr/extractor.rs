//! Text extraction from product images.
//!
//! Wraps an [`OcrBackend`] and flattens its fragments into one string per
//! image: fragments in backend order, joined by single spaces.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backend::{OcrBackend, OcrError, OcrFragment};

/// Text extractor shared by every row of a run.
#[derive(Clone)]
pub struct TextExtractor {
    backend: Arc<dyn OcrBackend>,
}

impl TextExtractor {
    /// Create a new text extractor over an initialized backend.
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn OcrBackend {
        self.backend.as_ref()
    }

    /// Extract the flat text of one image.
    ///
    /// An image with no recognized fragments yields an empty string.
    pub fn extract_text(&self, image_path: &Path) -> Result<String, OcrError> {
        check_image_content(image_path)?;
        let fragments = self.backend.recognize(image_path)?;
        Ok(join_fragments(&fragments))
    }

    /// Extract text for a batch of images.
    ///
    /// Each image is independent: one failure does not affect the others,
    /// and results line up with `paths` by position.
    pub fn extract_batch(&self, paths: &[PathBuf]) -> Vec<Result<String, OcrError>> {
        paths.iter().map(|p| self.extract_text(p)).collect()
    }
}

/// Join fragment texts with single spaces, dropping empty fragments.
pub fn join_fragments(fragments: &[OcrFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reject files whose magic bytes identify them as something other than an
/// image (an HTML error page saved under a .jpg name, for instance).
///
/// Unknown formats are passed through and left to the backend.
fn check_image_content(path: &Path) -> Result<(), OcrError> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 8192];
    let bytes_read = file.read(&mut buffer)?;

    if bytes_read == 0 {
        return Err(OcrError::OcrFailed(format!(
            "empty image file: {}",
            path.display()
        )));
    }

    match infer::get(&buffer[..bytes_read]) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Image => {
            Err(OcrError::NotAnImage {
                path: path.to_path_buf(),
                detected: kind.mime_type().to_string(),
            })
        }
        _ => Ok(()),
    }
}
