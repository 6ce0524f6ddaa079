//! Tesseract OCR backend implementation.
//!
//! Uses Tesseract OCR via command-line for text extraction.
//! This is the traditional, widely-available OCR option.
//!
//! Tesseract is asked for TSV output so each recognized line comes back as a
//! separate fragment with a bounding box and a mean word confidence.

use std::path::Path;
use std::process::Command;

use super::backend::{BoundingBox, OcrBackend, OcrBackendType, OcrConfig, OcrError, OcrFragment};
use super::model_utils::check_binary;

/// Tesseract OCR backend.
pub struct TesseractBackend {
    config: OcrConfig,
}

impl TesseractBackend {
    /// Create a new Tesseract backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: OcrConfig::default(),
        }
    }

    /// Create a new Tesseract backend with custom configuration.
    pub fn with_config(config: OcrConfig) -> Self {
        Self { config }
    }

    /// Run Tesseract on an image file, returning raw TSV.
    fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.config.language])
            .arg("tsv")
            .output();

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::OcrFailed(format!(
                        "tesseract failed: {}",
                        stderr.trim()
                    )))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractBackend {
    fn backend_type(&self) -> OcrBackendType {
        OcrBackendType::Tesseract
    }

    fn is_available(&self) -> bool {
        check_binary("tesseract")
    }

    fn availability_hint(&self) -> String {
        if !check_binary("tesseract") {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        } else {
            format!("Tesseract is available (language: {})", self.config.language)
        }
    }

    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrFragment>, OcrError> {
        let tsv = self.run_tesseract(image_path)?;
        Ok(parse_tsv_lines(&tsv))
    }
}

/// Key identifying one text line in Tesseract's layout hierarchy.
type LineKey = (u32, u32, u32, u32);

struct LineAccumulator {
    key: LineKey,
    words: Vec<String>,
    confidences: Vec<f32>,
    bbox: Option<BoundingBox>,
}

impl LineAccumulator {
    fn into_fragment(self) -> Option<OcrFragment> {
        if self.words.is_empty() {
            return None;
        }
        let confidence = if self.confidences.is_empty() {
            None
        } else {
            let sum: f32 = self.confidences.iter().sum();
            Some((sum / self.confidences.len() as f32 / 100.0).clamp(0.0, 1.0))
        };
        Some(OcrFragment {
            text: self.words.join(" "),
            confidence,
            bbox: self.bbox,
        })
    }
}

/// Group Tesseract TSV word rows into line fragments, preserving output order.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Only level-5 (word) rows carry text.
pub(crate) fn parse_tsv_lines(tsv: &str) -> Vec<OcrFragment> {
    let mut fragments = Vec::new();
    let mut current: Option<LineAccumulator> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }

        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        let bbox = BoundingBox {
            left: num(6),
            top: num(7),
            width: num(8),
            height: num(9),
        };
        let conf = cols[10].trim().parse::<f32>().ok().filter(|c| *c >= 0.0);

        if current.as_ref().is_some_and(|line| line.key != key) {
            if let Some(fragment) = current.take().and_then(LineAccumulator::into_fragment) {
                fragments.push(fragment);
            }
        }

        let line = current.get_or_insert_with(|| LineAccumulator {
            key,
            words: Vec::new(),
            confidences: Vec::new(),
            bbox: None,
        });
        line.words.push(text.to_string());
        if let Some(c) = conf {
            line.confidences.push(c);
        }
        line.bbox = Some(match line.bbox {
            Some(existing) => existing.union(&bbox),
            None => bbox,
        });
    }

    if let Some(fragment) = current.and_then(LineAccumulator::into_fragment) {
        fragments.push(fragment);
    }

    fragments
}
