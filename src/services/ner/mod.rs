//! Named Entity Recognition over OCR text.
//!
//! Provides a `NerBackend` trait for pluggable extraction backends:
//! - `RuleNerBackend`: built-in, deterministic patterns tuned for packaging
//!   text (manufacturers, origin countries, certification marks)
//! - `HttpNerBackend`: a token-classification inference endpoint
//!   (Hugging Face compatible, `dslim/bert-base-NER` by default)
//!
//! Labels follow the CoNLL scheme: `PER`, `ORG`, `LOC`, `MISC`.

mod http;
mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpNerBackend, HttpNerConfig, DEFAULT_NER_ENDPOINT};
pub use rules::RuleNerBackend;

pub const LABEL_PERSON: &str = "PER";
pub const LABEL_ORGANIZATION: &str = "ORG";
pub const LABEL_LOCATION: &str = "LOC";
pub const LABEL_MISC: &str = "MISC";

/// A labeled span of the input text.
///
/// `start`/`end` are byte offsets into the text the span was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub label: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Confidence (0.0 - 1.0).
    pub score: f32,
}

impl EntitySpan {
    /// Compare two spans, allowing `tolerance` of drift in the score.
    pub fn approx_eq(&self, other: &EntitySpan, tolerance: f32) -> bool {
        self.label == other.label
            && self.text == other.text
            && self.start == other.start
            && self.end == other.end
            && (self.score - other.score).abs() <= tolerance
    }
}

/// Errors from NER backends.
#[derive(Debug, Error)]
pub enum NerError {
    /// The backend could not be initialized.
    #[error("NER backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("NER request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected NER response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Trait for pluggable NER backends.
///
/// Batching is a throughput detail: for any backend, `extract_batch` on N
/// texts must return the same spans as N calls with one text each.
#[async_trait]
pub trait NerBackend: Send + Sync {
    /// Human-readable backend identifier (e.g. "rules", "http").
    fn backend_id(&self) -> &str;

    /// Whether the backend is ready to run.
    async fn is_available(&self) -> bool;

    /// Human-readable reason when `is_available` returns false.
    fn availability_hint(&self) -> String;

    /// Exercise the backend once before any row is processed.
    ///
    /// Local backends have nothing to check; remote ones make a real request
    /// so a refused connection or rejected token fails at startup.
    async fn warm_up(&self) -> Result<(), NerError> {
        Ok(())
    }

    /// Extract entities for each text, results aligned with `texts`.
    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, NerError>;

    /// Extract entities from one text.
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, NerError> {
        let mut results = self.extract_batch(&[text.to_string()]).await?;
        Ok(results.pop().unwrap_or_default())
    }
}

/// Available NER backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NerBackendType {
    Rules,
    Http,
}

impl NerBackendType {
    pub const ALL: [NerBackendType; 2] = [NerBackendType::Rules, NerBackendType::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            NerBackendType::Rules => "rules",
            NerBackendType::Http => "http",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rules" | "regex" => Some(NerBackendType::Rules),
            "http" | "huggingface" | "hf" => Some(NerBackendType::Http),
            _ => None,
        }
    }
}

impl std::fmt::Display for NerBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Construct a backend without checking availability.
pub fn build_ner_backend(
    backend_type: NerBackendType,
    http_config: HttpNerConfig,
) -> Result<Arc<dyn NerBackend>, NerError> {
    Ok(match backend_type {
        NerBackendType::Rules => Arc::new(RuleNerBackend::new()),
        NerBackendType::Http => Arc::new(HttpNerBackend::new(http_config)?),
    })
}

/// Construct a backend and verify it can run.
pub async fn create_ner_backend(
    backend_type: NerBackendType,
    http_config: HttpNerConfig,
) -> Result<Arc<dyn NerBackend>, NerError> {
    let backend = build_ner_backend(backend_type, http_config)?;
    if !backend.is_available().await {
        return Err(NerError::BackendNotAvailable(backend.availability_hint()));
    }
    if let Err(e) = backend.warm_up().await {
        return Err(NerError::BackendNotAvailable(format!(
            "{} backend failed a test request: {}",
            backend.backend_id(),
            e
        )));
    }
    tracing::debug!("NER backend ready: {}", backend.backend_id());
    Ok(backend)
}

/// Convert a character offset into a byte offset within `text`.
///
/// Offsets past the end clamp to `text.len()`.
pub(crate) fn char_to_byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_names() {
        for t in NerBackendType::ALL {
            assert_eq!(NerBackendType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(NerBackendType::from_str("HF"), Some(NerBackendType::Http));
        assert_eq!(NerBackendType::from_str("spacy"), None);
    }

    #[test]
    fn test_char_to_byte_offset() {
        let text = "µg Acme";
        assert_eq!(char_to_byte_offset(text, 0), 0);
        assert_eq!(char_to_byte_offset(text, 1), 2);
        assert_eq!(char_to_byte_offset(text, 3), 4);
        assert_eq!(char_to_byte_offset(text, 99), text.len());
    }

    #[test]
    fn test_span_approx_eq() {
        let a = EntitySpan {
            label: "ORG".into(),
            text: "Acme".into(),
            start: 0,
            end: 4,
            score: 0.91,
        };
        let mut b = a.clone();
        b.score = 0.9100004;
        assert!(a.approx_eq(&b, 1e-4));
        b.end = 5;
        assert!(!a.approx_eq(&b, 1e-4));
    }

    #[tokio::test]
    async fn test_rules_backend_created_and_available() {
        let backend = create_ner_backend(NerBackendType::Rules, HttpNerConfig::default())
            .await
            .unwrap();
        assert_eq!(backend.backend_id(), "rules");
    }

    #[tokio::test]
    async fn test_http_backend_without_endpoint_is_unavailable() {
        let config = HttpNerConfig {
            endpoint: None,
            ..HttpNerConfig::default()
        };
        let err = create_ner_backend(NerBackendType::Http, config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NerError::BackendNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_http_backend_unreachable_endpoint_fails_at_startup() {
        let config = HttpNerConfig {
            endpoint: Some("http://127.0.0.1:9/ner".to_string()),
            timeout: std::time::Duration::from_secs(5),
            ..HttpNerConfig::default()
        };
        let err = create_ner_backend(NerBackendType::Http, config)
            .await
            .err()
            .unwrap();
        match err {
            NerError::BackendNotAvailable(hint) => assert!(hint.contains("http")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
