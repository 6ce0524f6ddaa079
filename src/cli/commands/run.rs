//! Full pipeline command.

use console::style;
use tokio::sync::mpsc;

use super::cancel_on_ctrl_c;
use crate::cli::progress::RunProgress;
use crate::config::Settings;
use crate::dataset::{load_rows, write_results};
use crate::ocr::{create_backend, TextExtractor};
use crate::services::download::DownloadCoordinator;
use crate::services::ner::create_ner_backend;
use crate::services::pipeline::{Pipeline, PipelineEvent, RunSummary};

/// Download, extract, and write the results table.
pub async fn cmd_run(settings: &Settings, show_progress: bool) -> anyhow::Result<()> {
    // Backend problems are fatal before any row is touched.
    let ocr = create_backend(settings.ocr_backend, settings.ocr_config())?;
    let ner = create_ner_backend(settings.ner_backend, settings.ner_http_config()).await?;

    let rows = load_rows(&settings.input_path, &settings.columns)?;
    if rows.is_empty() {
        println!(
            "{} No rows in {}",
            style("!").yellow(),
            settings.input_path.display()
        );
        return Ok(());
    }

    let extractor = TextExtractor::new(ocr);
    println!(
        "{} Processing {} rows from {} ({} OCR, {} NER, {} workers)",
        style("→").cyan(),
        rows.len(),
        settings.input_path.display(),
        extractor.backend().backend_type(),
        ner.backend_id(),
        settings.workers
    );

    let coordinator = DownloadCoordinator::from_config(&settings.download_config())?;
    let pipeline = Pipeline::new(extractor, ner, settings.batch_size);
    let cancel = cancel_on_ctrl_c();

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(256);
    let event_handler = tokio::spawn(async move {
        let mut progress = RunProgress::new(show_progress);
        while let Some(event) = event_rx.recv().await {
            progress.on_pipeline(event);
        }
        progress.finish()
    });

    let output = pipeline
        .run(&rows, &coordinator, &settings.save_folder, event_tx, cancel.clone())
        .await?;

    let tally = match event_handler.await {
        Ok(tally) => Some(tally),
        Err(e) => {
            tracing::warn!("Event handler task failed: {}", e);
            None
        }
    };

    write_results(
        &settings.output_path,
        &output.records,
        &settings.columns,
        settings.output_format,
    )?;

    if let Some(tally) = tally {
        println!(
            "{} Images: {} downloaded, {} cached, {} failed",
            style("✓").green(),
            tally.downloaded,
            tally.cached,
            tally.failed
        );
    }
    print_summary(&output.summary);
    println!(
        "{} Wrote {} records to {} ({})",
        style("✓").green(),
        output.records.len(),
        settings.output_path.display(),
        settings.output_format.as_str()
    );

    if cancel.is_cancelled() {
        println!(
            "{} Run was interrupted; unprocessed rows are listed as cancelled",
            style("!").yellow()
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} Rows: {} total, {} processed, {} skipped",
        style("✓").green(),
        summary.total_rows,
        summary.processed,
        summary.skipped.len()
    );
    for (reason, count) in summary.skipped_by_reason() {
        println!("  {} {:<16} {}", style("→").dim(), reason.as_str(), count);
    }
}
