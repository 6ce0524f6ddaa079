//! Rule-based NER backend tuned for product packaging text.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{
    EntitySpan, NerBackend, NerError, LABEL_LOCATION, LABEL_MISC, LABEL_ORGANIZATION,
    LABEL_PERSON,
};

/// Regex-based NER backend.
///
/// Finds manufacturers (company suffixes, "Manufactured by ..."), origin
/// countries, certification marks and titled person names. Each rule
/// carries a fixed confidence, so output is fully deterministic.
pub struct RuleNerBackend;

impl RuleNerBackend {
    pub fn new() -> Self {
        Self
    }

    /// Extract spans from a single text, sorted by position.
    ///
    /// Rules run in priority order; a span overlapping one already accepted
    /// is dropped.
    pub fn extract_spans(&self, text: &str) -> Vec<EntitySpan> {
        let mut spans: Vec<EntitySpan> = Vec::new();
        if text.trim().is_empty() {
            return spans;
        }

        for rule in RULES.iter() {
            for cap in rule.regex.captures_iter(text) {
                let Some(m) = cap.get(1).or_else(|| cap.get(0)) else {
                    continue;
                };
                if spans.iter().any(|s| m.start() < s.end && s.start < m.end()) {
                    continue;
                }
                spans.push(EntitySpan {
                    label: rule.label.to_string(),
                    text: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    score: rule.score,
                });
            }
        }

        spans.sort_by_key(|s| (s.start, s.end));
        spans
    }
}

impl Default for RuleNerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NerBackend for RuleNerBackend {
    fn backend_id(&self) -> &str {
        "rules"
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn availability_hint(&self) -> String {
        "Built-in rule backend (always available)".to_string()
    }

    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, NerError> {
        Ok(texts.iter().map(|t| self.extract_spans(t)).collect())
    }
}

// ============================================================================
// Rules
// ============================================================================

struct Rule {
    label: &'static str,
    score: f32,
    regex: Regex,
}

impl Rule {
    fn new(label: &'static str, score: f32, pattern: &str) -> Self {
        Self {
            label,
            score,
            regex: Regex::new(pattern).expect("NER rule pattern should compile"),
        }
    }
}

const COUNTRIES: &[&str] = &[
    "Australia",
    "Austria",
    "Bangladesh",
    "Belgium",
    "Brazil",
    "Cambodia",
    "Canada",
    "China",
    "Denmark",
    "France",
    "Germany",
    "India",
    "Indonesia",
    "Ireland",
    "Italy",
    "Japan",
    "Korea",
    "Malaysia",
    "Mexico",
    "Netherlands",
    "Pakistan",
    "Philippines",
    "Poland",
    "Portugal",
    "Spain",
    "Sweden",
    "Switzerland",
    "Taiwan",
    "Thailand",
    "Turkey",
    "United Kingdom",
    "United States",
    "Vietnam",
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let countries = COUNTRIES
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");

    vec![
        // Acme Foods Inc, Nordic Home GmbH
        Rule::new(
            LABEL_ORGANIZATION,
            0.85,
            r"\b((?:[A-Z][A-Za-z0-9&'-]*\s+){1,3}(?:Incorporated|Inc|Ltd|LLC|GmbH|Corporation|Corp|Company|Co|AG|PLC|Pty|S\.A)\b)",
        ),
        // Manufactured by / Distributed by / Packed for ...
        Rule::new(
            LABEL_ORGANIZATION,
            0.8,
            r"(?i:manufactured|distributed|packed|imported|marketed)\s+(?i:by|for)\s*:?\s+([A-Z][A-Za-z0-9&'-]*(?:\s+[A-Z][A-Za-z0-9&'-]*){0,3})",
        ),
        // Made in China, Assembled in the United States
        Rule::new(
            LABEL_LOCATION,
            0.9,
            r"\b(?i:made|manufactured|assembled|printed|produced)\s+(?i:in)\s+(?:the\s+)?((?:[A-Z][a-z]+|[A-Z]{2,3})(?:\s+[A-Z][a-z]+){0,2})",
        ),
        Rule::new(
            LABEL_PERSON,
            0.8,
            r"\b(?:Dr\.|Prof\.|Mr\.|Mrs\.|Ms\.|Chef)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)",
        ),
        Rule::new(LABEL_LOCATION, 0.75, &format!(r"\b({})\b", countries)),
        // Certification and compliance marks
        Rule::new(
            LABEL_MISC,
            0.7,
            r"\b(CE|UL|ETL|FCC|RoHS|CSA|FDA|USDA|BPA[- ]Free|Energy Star|ENERGY STAR|ISO\s?\d{4,5})\b",
        ),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(spans: &[EntitySpan]) -> Vec<(&str, &str)> {
        spans
            .iter()
            .map(|s| (s.label.as_str(), s.text.as_str()))
            .collect()
    }

    #[test]
    fn test_packaging_text() {
        let text = "Manufactured by Acme Foods Inc. Made in China. CE certified.";
        let spans = RuleNerBackend::new().extract_spans(text);

        assert_eq!(
            labels(&spans),
            vec![("ORG", "Acme Foods Inc"), ("LOC", "China"), ("MISC", "CE")]
        );

        let org = &spans[0];
        assert_eq!(&text[org.start..org.end], "Acme Foods Inc");
        assert_eq!(org.score, 0.85);
        assert_eq!(spans[1].score, 0.9);
    }

    #[test]
    fn test_empty_text_has_no_entities() {
        let backend = RuleNerBackend::new();
        assert!(backend.extract_spans("").is_empty());
        assert!(backend.extract_spans("   ").is_empty());
    }

    #[test]
    fn test_made_in_multiword_country() {
        let spans = RuleNerBackend::new().extract_spans("Designed in Sweden, made in the United Kingdom");
        assert_eq!(
            labels(&spans),
            vec![("LOC", "Sweden"), ("LOC", "United Kingdom")]
        );
        // The "made in" rule wins over the gazetteer.
        assert_eq!(spans[1].score, 0.9);
        assert_eq!(spans[0].score, 0.75);
    }

    #[test]
    fn test_titled_person() {
        let spans = RuleNerBackend::new().extract_spans("Recipe by Chef Marco Rossi");
        assert_eq!(labels(&spans), vec![("PER", "Marco Rossi")]);
    }

    #[test]
    fn test_certification_marks_are_case_sensitive() {
        let spans = RuleNerBackend::new().extract_spans("ce ul etl but UL listed and BPA-Free");
        assert_eq!(labels(&spans), vec![("MISC", "UL"), ("MISC", "BPA-Free")]);
    }

    #[test]
    fn test_deterministic() {
        let backend = RuleNerBackend::new();
        let text = "Nordic Home GmbH, Made in Germany, ISO 9001";
        assert_eq!(backend.extract_spans(text), backend.extract_spans(text));
    }

    #[tokio::test]
    async fn test_batch_matches_single_calls() {
        let backend = RuleNerBackend::new();
        let texts = vec![
            "Distributed by Green Leaf Co".to_string(),
            String::new(),
            "230V Made in Vietnam".to_string(),
        ];

        let batch = backend.extract_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), texts.len());
        for (text, spans) in texts.iter().zip(&batch) {
            assert_eq!(&backend.extract(text).await.unwrap(), spans);
        }
        assert!(batch[1].is_empty());
    }
}
