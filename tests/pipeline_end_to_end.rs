//! Table in, results table out, against a local image server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path as UrlPath;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use labelscan::dataset::{read_rows, write_results, OutputFormat, TableSchema};
use labelscan::ocr::{OcrBackend, OcrBackendType, OcrError, OcrFragment, TextExtractor};
use labelscan::services::download::{DownloadConfig, DownloadCoordinator};
use labelscan::services::ner::{
    create_ner_backend, HttpNerBackend, HttpNerConfig, NerBackend, NerBackendType, NerError,
    RuleNerBackend,
};
use labelscan::services::pipeline::{Pipeline, SkipReason};

/// "Images" whose bytes are the label text.
fn label_text(name: &str) -> Option<&'static str> {
    match name {
        "cereal.jpg" => Some("Net Wt. 500 g Acme Foods Inc Made in China"),
        "lamp.jpg" => Some("Input 220 V 60 W"),
        _ => None,
    }
}

async fn image(UrlPath(name): UrlPath<String>) -> (StatusCode, Vec<u8>) {
    match label_text(&name) {
        Some(text) => (StatusCode::OK, text.as_bytes().to_vec()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// Token-classification output for one input, character offsets. Scores
/// drift slightly with batch size, as batched model inference does.
async fn inference(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    let inputs = body["inputs"].as_array().cloned().unwrap_or_default();
    let score = 0.98 - 0.00001 * inputs.len() as f64;
    let results: Vec<serde_json::Value> = inputs
        .iter()
        .map(|input| {
            let text = input.as_str().unwrap_or_default();
            match text.find("Acme") {
                Some(start) => serde_json::json!([{
                    "entity_group": "ORG",
                    "score": score,
                    "word": "Acme",
                    "start": text[..start].chars().count(),
                    "end": text[..start].chars().count() + 4,
                }]),
                None => serde_json::json!([]),
            }
        })
        .collect();
    Json(serde_json::Value::Array(results))
}

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/images/:name", get(image))
        .route("/ner", post(inference))
        .route("/ner-denied", post(|| async { StatusCode::UNAUTHORIZED }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Reads the downloaded file as UTF-8 text.
struct FileTextBackend;

impl OcrBackend for FileTextBackend {
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
        Ok(text.split_whitespace().map(OcrFragment::new).collect())
    }
}

fn coordinator() -> DownloadCoordinator {
    DownloadCoordinator::from_config(&DownloadConfig {
        workers: 2,
        max_retries: 2,
        retry_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        ..DownloadConfig::default()
    })
    .unwrap()
}

fn input_csv(addr: SocketAddr) -> String {
    format!(
        "index,image_link,entity_name\n\
         0,http://{addr}/images/cereal.jpg,item_weight\n\
         1,not a link,item_weight\n\
         2,http://{addr}/images/lamp.jpg,voltage\n\
         3,http://{addr}/images/missing.jpg,wattage\n"
    )
}

#[tokio::test]
async fn test_run_produces_records_and_summary() {
    let addr = serve().await;
    let dir = TempDir::new().unwrap();
    let schema = TableSchema::default();
    let rows = read_rows(input_csv(addr).as_bytes(), &schema, "input.csv").unwrap();
    assert_eq!(rows.len(), 4);

    let pipeline = Pipeline::new(
        TextExtractor::new(Arc::new(FileTextBackend)),
        Arc::new(RuleNerBackend::new()),
        3,
    );
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let drain = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

    let output = pipeline
        .run(
            &rows,
            &coordinator(),
            &dir.path().join("images"),
            event_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    drain.await.unwrap();

    let indices: Vec<&str> = output.records.iter().map(|r| r.index.as_str()).collect();
    assert_eq!(indices, vec!["0", "2"]);

    let cereal = &output.records[0];
    assert_eq!(cereal.text, "Net Wt. 500 g Acme Foods Inc Made in China");
    assert_eq!(cereal.features["item_weight"], vec!["500 g"]);
    let labels: Vec<(&str, &str)> = cereal
        .entities
        .iter()
        .map(|e| (e.label.as_str(), e.text.as_str()))
        .collect();
    assert!(labels.contains(&("ORG", "Acme Foods Inc")));
    assert!(labels.contains(&("LOC", "China")));
    for span in &cereal.entities {
        assert_eq!(&cereal.text[span.start..span.end], span.text);
    }

    let lamp = &output.records[1];
    assert_eq!(lamp.features["voltage"], vec!["220 V"]);
    assert_eq!(lamp.features["wattage"], vec!["60 W"]);
    assert_eq!(lamp.entity_name.as_deref(), Some("voltage"));

    let summary = &output.summary;
    assert_eq!(summary.total_rows, 4);
    assert_eq!(summary.processed, 2);
    let reasons: Vec<(usize, SkipReason)> =
        summary.skipped.iter().map(|s| (s.row, s.reason)).collect();
    assert_eq!(
        reasons,
        vec![(1, SkipReason::InvalidLink), (3, SkipReason::DownloadFailed)]
    );

    let out_path = dir.path().join("out").join("results.csv");
    write_results(&out_path, &output.records, &schema, OutputFormat::Csv).unwrap();

    let mut reader = csv::Reader::from_path(&out_path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, vec!["index", "text", "ner", "regex", "entity_name"]);
    let written: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(written.len(), 2);
    assert_eq!(&written[0][0], "0");
    let regex: serde_json::Value = serde_json::from_str(&written[1][3]).unwrap();
    assert_eq!(regex["voltage"][0], "220 V");
}

#[tokio::test]
async fn test_cancelled_run_processes_nothing() {
    let addr = serve().await;
    let dir = TempDir::new().unwrap();
    let rows = read_rows(input_csv(addr).as_bytes(), &TableSchema::default(), "input.csv").unwrap();

    let pipeline = Pipeline::new(
        TextExtractor::new(Arc::new(FileTextBackend)),
        Arc::new(RuleNerBackend::new()),
        2,
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let drain = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
    let output = pipeline
        .run(&rows, &coordinator(), dir.path(), event_tx, cancel)
        .await
        .unwrap();
    drain.await.unwrap();

    assert!(output.records.is_empty());
    assert_eq!(output.summary.skipped.len(), 4);
    assert_eq!(output.summary.skipped_by_reason()[&SkipReason::Cancelled], 3);
}

#[tokio::test]
async fn test_http_ner_backend_converts_offsets() {
    let addr = serve().await;
    let backend = HttpNerBackend::new(HttpNerConfig {
        endpoint: Some(format!("http://{}/ner", addr)),
        api_token: Some("test-token".to_string()),
        timeout: Duration::from_secs(5),
        wait_for_model: false,
    })
    .unwrap();

    assert!(backend.is_available().await);

    let texts = vec![
        "Café Acme".to_string(),
        String::new(),
        "no entities here".to_string(),
    ];
    let results = backend.extract_batch(&texts).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].len(), 1);
    let span = &results[0][0];
    assert_eq!(span.label, "ORG");
    // "é" is two bytes: character offset 5 is byte offset 6.
    assert_eq!((span.start, span.end), (6, 10));
    assert_eq!(&texts[0][span.start..span.end], "Acme");
    assert!(results[1].is_empty());
    assert!(results[2].is_empty());
}

fn http_config(addr: SocketAddr, path: &str) -> HttpNerConfig {
    HttpNerConfig {
        endpoint: Some(format!("http://{}{}", addr, path)),
        api_token: None,
        timeout: Duration::from_secs(5),
        wait_for_model: false,
    }
}

#[tokio::test]
async fn test_http_ner_batch_matches_single_calls() {
    let addr = serve().await;
    let backend = HttpNerBackend::new(http_config(addr, "/ner")).unwrap();

    let texts = vec![
        "Acme Foods Inc".to_string(),
        "plain text".to_string(),
        "Distributed by Acme".to_string(),
    ];
    let batch = backend.extract_batch(&texts).await.unwrap();

    for (text, batch_spans) in texts.iter().zip(&batch) {
        let single = backend.extract(text).await.unwrap();
        assert_eq!(single.len(), batch_spans.len());
        for (a, b) in single.iter().zip(batch_spans) {
            assert!(a.approx_eq(b, 1e-3), "{a:?} vs {b:?}");
        }
    }
    // Scores differ across batch sizes, so exact equality would not hold.
    assert_ne!(batch[0][0].score, backend.extract(&texts[0]).await.unwrap()[0].score);
}

#[tokio::test]
async fn test_http_ner_startup_check() {
    let addr = serve().await;

    let backend = create_ner_backend(NerBackendType::Http, http_config(addr, "/ner"))
        .await
        .unwrap();
    assert_eq!(backend.backend_id(), "http");

    let err = create_ner_backend(NerBackendType::Http, http_config(addr, "/ner-denied"))
        .await
        .err()
        .unwrap();
    match err {
        NerError::BackendNotAvailable(hint) => assert!(hint.contains("401"), "{hint}"),
        other => panic!("unexpected error: {other:?}"),
    }
}
