//! Per-row extraction pipeline: download, OCR, NER, unit patterns.
//!
//! Rows are correlated by their position in the input at every stage. The
//! extraction loop runs batch by batch in input order, so records come out
//! in the same order as the rows they belong to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::download::{
    DownloadCoordinator, DownloadError, DownloadEvent, DownloadReport, DownloadRequest,
};
use super::features::extract_features;
use super::ner::{EntitySpan, NerBackend};
use crate::dataset::{ResultRecord, Row};
use crate::ocr::{OcrError, TextExtractor};

/// Why a row produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidLink,
    DownloadFailed,
    OcrFailure,
    NerFailure,
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidLink => "invalid link",
            SkipReason::DownloadFailed => "download failed",
            SkipReason::OcrFailure => "OCR failure",
            SkipReason::NerFailure => "NER failure",
            SkipReason::Cancelled => "cancelled",
        }
    }

    fn from_download_error(error: &DownloadError) -> Self {
        match error {
            DownloadError::InvalidLink { .. } => SkipReason::InvalidLink,
            DownloadError::Exhausted { .. } | DownloadError::Io(_) => SkipReason::DownloadFailed,
            DownloadError::Cancelled => SkipReason::Cancelled,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    /// Position in the input table.
    pub row: usize,
    /// Value of the index column.
    pub index: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// Outcome counts for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub processed: usize,
    pub skipped: Vec<SkippedRow>,
}

impl RunSummary {
    pub fn skipped_by_reason(&self) -> BTreeMap<SkipReason, usize> {
        let mut counts = BTreeMap::new();
        for skip in &self.skipped {
            *counts.entry(skip.reason).or_insert(0) += 1;
        }
        counts
    }

    fn skip(&mut self, row: usize, index: &str, reason: SkipReason, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!("Skipping row {} (index {}): {}: {}", row, index, reason, detail);
        self.skipped.push(SkippedRow {
            row,
            index: index.to_string(),
            reason,
            detail,
        });
    }
}

/// Progress events from the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Download(DownloadEvent),
    /// Extraction is about to start on `rows` resolved rows.
    ExtractionStarted { rows: usize },
    BatchStarted { batch: usize, rows: usize },
    RowFinished { row: usize },
    RowSkipped { row: usize, reason: SkipReason },
}

/// Records plus the run summary.
#[derive(Debug)]
pub struct PipelineOutput {
    pub records: Vec<ResultRecord>,
    pub summary: RunSummary,
}

pub struct Pipeline {
    extractor: TextExtractor,
    ner: Arc<dyn NerBackend>,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(extractor: TextExtractor, ner: Arc<dyn NerBackend>, batch_size: usize) -> Self {
        Self {
            extractor,
            ner,
            batch_size: batch_size.max(1),
        }
    }

    /// Download every row's image into `folder`, then extract.
    pub async fn run(
        &self,
        rows: &[Row],
        coordinator: &DownloadCoordinator,
        folder: &Path,
        event_tx: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> Result<PipelineOutput, DownloadError> {
        let requests = rows
            .iter()
            .enumerate()
            .map(|(row, r)| DownloadRequest {
                row,
                link: r.image_link.clone(),
            })
            .collect();

        let (download_tx, mut download_rx) = mpsc::channel(64);
        let forward_tx = event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = download_rx.recv().await {
                let _ = forward_tx.send(PipelineEvent::Download(event)).await;
            }
        });

        let downloads = coordinator
            .download_all(requests, folder, download_tx, cancel.clone())
            .await;
        let _ = forwarder.await;

        Ok(self.extract(rows, &downloads?, event_tx, cancel).await)
    }

    /// Extract records for every row that has a local image in `downloads`.
    pub async fn extract(
        &self,
        rows: &[Row],
        downloads: &DownloadReport,
        event_tx: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> PipelineOutput {
        let mut summary = RunSummary {
            total_rows: rows.len(),
            ..RunSummary::default()
        };
        let mut records = Vec::new();

        let mut resolved: Vec<(usize, PathBuf)> = Vec::new();
        for (position, row) in rows.iter().enumerate() {
            match downloads.outcomes.get(&position) {
                Some(Ok(path)) => resolved.push((position, path.clone())),
                Some(Err(e)) => {
                    let reason = SkipReason::from_download_error(e);
                    summary.skip(position, &row.index, reason, e.to_string());
                    let _ = event_tx.send(PipelineEvent::RowSkipped { row: position, reason }).await;
                }
                None => {
                    summary.skip(position, &row.index, SkipReason::DownloadFailed, "no download outcome");
                }
            }
        }

        let _ = event_tx
            .send(PipelineEvent::ExtractionStarted {
                rows: resolved.len(),
            })
            .await;

        for (batch, chunk) in resolved.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("Cancelled before batch {}", batch);
                let remaining = &resolved[batch * self.batch_size..];
                for (position, _) in remaining {
                    summary.skip(
                        *position,
                        &rows[*position].index,
                        SkipReason::Cancelled,
                        "run interrupted",
                    );
                }
                break;
            }

            tracing::debug!("Batch {}: {} rows", batch, chunk.len());
            let _ = event_tx
                .send(PipelineEvent::BatchStarted {
                    batch,
                    rows: chunk.len(),
                })
                .await;

            let texts = self.ocr_batch(chunk).await;

            let mut ocr_ok: Vec<(usize, String)> = Vec::with_capacity(chunk.len());
            for ((position, _), text) in chunk.iter().zip(texts) {
                match text {
                    Ok(text) => ocr_ok.push((*position, text)),
                    Err(e) => {
                        summary.skip(*position, &rows[*position].index, SkipReason::OcrFailure, e.to_string());
                        let _ = event_tx
                            .send(PipelineEvent::RowSkipped {
                                row: *position,
                                reason: SkipReason::OcrFailure,
                            })
                            .await;
                    }
                }
            }

            let entities = self.ner_batch(&ocr_ok).await;

            for ((position, text), spans) in ocr_ok.into_iter().zip(entities) {
                let row = &rows[position];
                match spans {
                    Ok(spans) => {
                        let features = extract_features(&text);
                        records.push(ResultRecord {
                            index: row.index.clone(),
                            entity_name: row.entity_name.clone(),
                            text,
                            entities: spans,
                            features,
                        });
                        summary.processed += 1;
                        let _ = event_tx.send(PipelineEvent::RowFinished { row: position }).await;
                    }
                    Err(detail) => {
                        summary.skip(position, &row.index, SkipReason::NerFailure, detail);
                        let _ = event_tx
                            .send(PipelineEvent::RowSkipped {
                                row: position,
                                reason: SkipReason::NerFailure,
                            })
                            .await;
                    }
                }
            }
        }

        summary.skipped.sort_by_key(|s| s.row);
        tracing::info!(
            "Extraction finished: {} records, {} skipped",
            summary.processed,
            summary.skipped.len()
        );
        PipelineOutput { records, summary }
    }

    /// OCR a batch on the blocking pool. Results line up with `chunk`.
    async fn ocr_batch(&self, chunk: &[(usize, PathBuf)]) -> Vec<Result<String, OcrError>> {
        let extractor = self.extractor.clone();
        let paths: Vec<PathBuf> = chunk.iter().map(|(_, p)| p.clone()).collect();

        match tokio::task::spawn_blocking(move || extractor.extract_batch(&paths)).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("OCR batch task failed: {}", e);
                chunk
                    .iter()
                    .map(|_| Err(OcrError::OcrFailed(format!("OCR task failed: {}", e))))
                    .collect()
            }
        }
    }

    /// NER for a batch, falling back to one call per text if the batch call
    /// fails. Results line up with `texts`.
    async fn ner_batch(&self, texts: &[(usize, String)]) -> Vec<Result<Vec<EntitySpan>, String>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let inputs: Vec<String> = texts.iter().map(|(_, t)| t.clone()).collect();
        match self.ner.extract_batch(&inputs).await {
            Ok(batch) if batch.len() == inputs.len() => {
                return batch.into_iter().map(Ok).collect();
            }
            Ok(batch) => tracing::warn!(
                "NER batch returned {} results for {} texts, retrying per row",
                batch.len(),
                inputs.len()
            ),
            Err(e) => tracing::warn!("NER batch failed ({}), retrying per row", e),
        }

        let mut results = Vec::with_capacity(inputs.len());
        for text in &inputs {
            results.push(self.ner.extract(text).await.map_err(|e| e.to_string()));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrBackend, OcrBackendType, OcrFragment};
    use crate::services::ner::{NerError, RuleNerBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Treats the image file's bytes as its recognized text.
    struct FileTextOcr;

    impl OcrBackend for FileTextOcr {
        fn backend_type(&self) -> OcrBackendType {
            OcrBackendType::Tesseract
        }

        fn is_available(&self) -> bool {
            true
        }

        fn availability_hint(&self) -> String {
            String::new()
        }

        fn recognize(&self, image_path: &Path) -> Result<Vec<OcrFragment>, OcrError> {
            let text = std::fs::read_to_string(image_path)?;
            if text.contains("CORRUPT") {
                return Err(OcrError::OcrFailed("corrupt image".into()));
            }
            Ok(text.lines().map(OcrFragment::new).collect())
        }
    }

    /// Batch calls always fail; single calls defer to the rule backend
    /// unless the text mentions "NER-FAIL".
    struct FlakyBatchNer {
        batch_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    #[async_trait]
    impl NerBackend for FlakyBatchNer {
        fn backend_id(&self) -> &str {
            "flaky"
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn availability_hint(&self) -> String {
            String::new()
        }

        async fn extract_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, NerError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if texts.len() > 1 {
                return Err(NerError::RequestFailed("batch too large".into()));
            }
            if texts.iter().any(|t| t.contains("NER-FAIL")) {
                return Err(NerError::RequestFailed("model error".into()));
            }
            RuleNerBackend::new().extract_batch(texts).await
        }

        async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, NerError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            let mut out = self.extract_batch(&[text.to_string()]).await?;
            Ok(out.pop().unwrap_or_default())
        }
    }

    fn row(index: &str) -> Row {
        Row {
            index: index.to_string(),
            image_link: Some(format!("https://example.com/{}.jpg", index)),
            entity_name: Some("item_weight".to_string()),
        }
    }

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn pipeline(ner: Arc<dyn NerBackend>, batch_size: usize) -> Pipeline {
        Pipeline::new(TextExtractor::new(Arc::new(FileTextOcr)), ner, batch_size)
    }

    fn discard_events() -> mpsc::Sender<PipelineEvent> {
        let (tx, _rx) = mpsc::channel(1);
        tx
    }

    #[tokio::test]
    async fn test_invalid_link_row_is_skipped() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row("1"), row("2"), row("3")];

        let mut downloads = DownloadReport::default();
        downloads
            .outcomes
            .insert(0, Ok(write(&dir, "1.jpg", "Net weight: 2.5 kg")));
        downloads.outcomes.insert(
            1,
            Err(Arc::new(DownloadError::InvalidLink {
                link: "nope".into(),
                reason: "relative URL without a base".into(),
            })),
        );
        downloads
            .outcomes
            .insert(2, Ok(write(&dir, "3.jpg", "Voltage: 120V\nMade in China")));

        let output = pipeline(Arc::new(RuleNerBackend::new()), 10)
            .extract(&rows, &downloads, discard_events(), CancellationToken::new())
            .await;

        let indices: Vec<&str> = output.records.iter().map(|r| r.index.as_str()).collect();
        assert_eq!(indices, vec!["1", "3"]);
        assert_eq!(output.records[0].features["item_weight"], vec!["2.5 kg"]);
        assert_eq!(output.records[1].text, "Voltage: 120V Made in China");
        assert_eq!(output.records[1].entities[0].text, "China");

        assert_eq!(output.summary.processed, 2);
        assert_eq!(output.summary.skipped.len(), 1);
        assert_eq!(output.summary.skipped[0].index, "2");
        assert_eq!(output.summary.skipped[0].reason, SkipReason::InvalidLink);
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_results() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<Row> = (0..7).map(|i| row(&i.to_string())).collect();
        let mut downloads = DownloadReport::default();
        for i in 0..7 {
            let text = format!("Pack {} of 500 g by Acme Foods Inc", i);
            downloads
                .outcomes
                .insert(i, Ok(write(&dir, &format!("{}.jpg", i), &text)));
        }

        let ner: Arc<dyn NerBackend> = Arc::new(RuleNerBackend::new());
        let one = pipeline(ner.clone(), 1)
            .extract(&rows, &downloads, discard_events(), CancellationToken::new())
            .await;
        let three = pipeline(ner, 3)
            .extract(&rows, &downloads, discard_events(), CancellationToken::new())
            .await;

        assert_eq!(one.records, three.records);
        assert_eq!(one.records.len(), 7);
    }

    #[tokio::test]
    async fn test_ocr_and_ner_failures_skip_rows() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row("a"), row("b"), row("c")];
        let mut downloads = DownloadReport::default();
        downloads.outcomes.insert(0, Ok(write(&dir, "a.jpg", "CORRUPT")));
        downloads.outcomes.insert(1, Ok(write(&dir, "b.jpg", "NER-FAIL 3 W")));
        downloads.outcomes.insert(2, Ok(write(&dir, "c.jpg", "40 watts")));

        let ner = Arc::new(FlakyBatchNer {
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        });
        let output = pipeline(ner.clone(), 10)
            .extract(&rows, &downloads, discard_events(), CancellationToken::new())
            .await;

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].index, "c");
        assert_eq!(output.records[0].features["wattage"], vec!["40 watts"]);
        // One failed batch, then one call per surviving row.
        assert_eq!(ner.single_calls.load(Ordering::SeqCst), 2);

        let by_reason = output.summary.skipped_by_reason();
        assert_eq!(by_reason[&SkipReason::OcrFailure], 1);
        assert_eq!(by_reason[&SkipReason::NerFailure], 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_rows() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row("x"), row("y")];
        let mut downloads = DownloadReport::default();
        downloads.outcomes.insert(0, Ok(write(&dir, "x.jpg", "1 kg")));
        downloads.outcomes.insert(1, Ok(write(&dir, "y.jpg", "2 kg")));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let output = pipeline(Arc::new(RuleNerBackend::new()), 1)
            .extract(&rows, &downloads, discard_events(), cancel)
            .await;

        assert!(output.records.is_empty());
        assert_eq!(
            output.summary.skipped_by_reason().get(&SkipReason::Cancelled),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_empty_text_gives_empty_entities_and_features() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row("blank")];
        let mut downloads = DownloadReport::default();
        downloads.outcomes.insert(0, Ok(write(&dir, "blank.jpg", "\n\n")));

        let output = pipeline(Arc::new(RuleNerBackend::new()), 10)
            .extract(&rows, &downloads, discard_events(), CancellationToken::new())
            .await;

        let record = &output.records[0];
        assert_eq!(record.text, "");
        assert!(record.entities.is_empty());
        assert!(record.features.is_empty());
    }
}
