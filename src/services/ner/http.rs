//! Token-classification backend over HTTP.
//!
//! Speaks the Hugging Face inference API shape: POST `{"inputs": [...]}`,
//! receive one list of `{entity_group, score, word, start, end}` per input.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{char_to_byte_offset, EntitySpan, NerBackend, NerError};

pub const DEFAULT_NER_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/dslim/bert-base-NER";

/// Configuration for [`HttpNerBackend`].
#[derive(Debug, Clone)]
pub struct HttpNerConfig {
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub timeout: Duration,
    /// Ask the service to block until the model is loaded instead of
    /// answering 503.
    pub wait_for_model: bool,
}

impl Default for HttpNerConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_NER_ENDPOINT.to_string()),
            api_token: None,
            timeout: Duration::from_secs(60),
            wait_for_model: true,
        }
    }
}

pub struct HttpNerBackend {
    config: HttpNerConfig,
    client: reqwest::Client,
}

impl HttpNerBackend {
    pub fn new(config: HttpNerConfig) -> Result<Self, NerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("labelscan/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> Option<&str> {
        self.config
            .endpoint
            .as_deref()
            .filter(|e| matches!(url::Url::parse(e), Ok(u) if u.scheme() == "http" || u.scheme() == "https"))
    }

    async fn request(&self, endpoint: &str, inputs: &[&str]) -> Result<Vec<Vec<RawEntity>>, NerError> {
        let body = InferenceRequest {
            inputs,
            parameters: InferenceParameters {
                aggregation_strategy: "simple",
            },
            options: InferenceOptions {
                wait_for_model: self.config.wait_for_model,
            },
        };

        let mut request = self.client.post(endpoint).json(&body);
        if let Some(ref token) = self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NerError::RequestFailed(format!(
                "{} returned {}: {}",
                endpoint,
                status,
                detail.trim()
            )));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| NerError::InvalidResponse(e.to_string()))?;
        align_response(parsed, inputs.len())
    }
}

#[async_trait]
impl NerBackend for HttpNerBackend {
    fn backend_id(&self) -> &str {
        "http"
    }

    async fn is_available(&self) -> bool {
        self.endpoint().is_some()
    }

    fn availability_hint(&self) -> String {
        match (&self.config.endpoint, self.endpoint()) {
            (_, Some(endpoint)) => format!("Inference endpoint: {}", endpoint),
            (Some(raw), None) => format!("Invalid NER endpoint URL: {}", raw),
            (None, None) => "No NER endpoint configured (set ner.endpoint)".to_string(),
        }
    }

    async fn warm_up(&self) -> Result<(), NerError> {
        let endpoint = self
            .endpoint()
            .ok_or_else(|| NerError::BackendNotAvailable(self.availability_hint()))?;
        tracing::debug!("NER warm-up request to {}", endpoint);
        self.request(endpoint, &["Made in China by Acme Inc"]).await?;
        Ok(())
    }

    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, NerError> {
        let mut results = vec![Vec::new(); texts.len()];

        // Empty texts never reach the service.
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        if pending.is_empty() {
            return Ok(results);
        }

        let endpoint = self
            .endpoint()
            .ok_or_else(|| NerError::BackendNotAvailable(self.availability_hint()))?;
        let inputs: Vec<&str> = pending.iter().map(|&i| texts[i].as_str()).collect();

        tracing::debug!("NER request: {} texts to {}", inputs.len(), endpoint);
        let raw = self.request(endpoint, &inputs).await?;

        for (&index, entities) in pending.iter().zip(raw) {
            results[index] = to_spans(&texts[index], entities);
        }
        Ok(results)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a [&'a str],
    parameters: InferenceParameters,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceParameters {
    aggregation_strategy: &'static str,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    entity_group: Option<String>,
    #[serde(default)]
    entity: Option<String>,
    score: f32,
    word: String,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
}

/// Single-input requests may come back as a flat list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batch(Vec<Vec<RawEntity>>),
    Single(Vec<RawEntity>),
}

fn align_response(
    response: InferenceResponse,
    expected: usize,
) -> Result<Vec<Vec<RawEntity>>, NerError> {
    let aligned = match response {
        InferenceResponse::Batch(batch) if batch.len() == expected => batch,
        // `[]` parses as an empty batch.
        InferenceResponse::Batch(batch) if batch.is_empty() && expected == 1 => vec![Vec::new()],
        InferenceResponse::Single(entities) if expected == 1 => vec![entities],
        InferenceResponse::Batch(batch) => {
            return Err(NerError::InvalidResponse(format!(
                "expected {} results, got {}",
                expected,
                batch.len()
            )))
        }
        InferenceResponse::Single(_) => {
            return Err(NerError::InvalidResponse(format!(
                "expected {} results, got a single list",
                expected
            )))
        }
    };
    Ok(aligned)
}

/// Convert service entities to spans over `text`.
///
/// The service reports character offsets; spans carry byte offsets. When
/// offsets are missing the span is located by searching for `word`.
fn to_spans(text: &str, entities: Vec<RawEntity>) -> Vec<EntitySpan> {
    let mut spans: Vec<EntitySpan> = entities
        .into_iter()
        .filter_map(|raw| {
            let label = raw
                .entity_group
                .or(raw.entity)
                .map(|l| strip_bio_prefix(&l).to_string())?;

            let (start, end) = match (raw.start, raw.end) {
                (Some(s), Some(e)) if s <= e => {
                    (char_to_byte_offset(text, s), char_to_byte_offset(text, e))
                }
                _ => {
                    let word = raw.word.trim();
                    let start = text.find(word)?;
                    (start, start + word.len())
                }
            };

            Some(EntitySpan {
                label,
                text: text[start..end].to_string(),
                start,
                end,
                score: raw.score,
            })
        })
        .collect();

    spans.sort_by_key(|s| (s.start, s.end));
    spans
}

fn strip_bio_prefix(label: &str) -> &str {
    label
        .strip_prefix("B-")
        .or_else(|| label.strip_prefix("I-"))
        .unwrap_or(label)
}
