//! Download-only command.

use console::style;
use tokio::sync::mpsc;

use super::cancel_on_ctrl_c;
use crate::cli::progress::RunProgress;
use crate::config::Settings;
use crate::dataset::load_rows;
use crate::services::download::{DownloadCoordinator, DownloadEvent, DownloadRequest};

/// Download every image referenced by the input table.
pub async fn cmd_download(settings: &Settings, show_progress: bool) -> anyhow::Result<()> {
    let rows = load_rows(&settings.input_path, &settings.columns)?;
    if rows.is_empty() {
        println!(
            "{} No rows in {}",
            style("!").yellow(),
            settings.input_path.display()
        );
        return Ok(());
    }

    println!(
        "{} Downloading images for {} rows into {} ({} workers)",
        style("→").cyan(),
        rows.len(),
        settings.save_folder.display(),
        settings.workers
    );

    let coordinator = DownloadCoordinator::from_config(&settings.download_config())?;
    let requests = rows
        .iter()
        .enumerate()
        .map(|(row, r)| DownloadRequest {
            row,
            link: r.image_link.clone(),
        })
        .collect();

    let (event_tx, mut event_rx) = mpsc::channel::<DownloadEvent>(100);
    let event_handler = tokio::spawn(async move {
        let mut progress = RunProgress::new(show_progress);
        while let Some(event) = event_rx.recv().await {
            progress.on_download(event);
        }
        progress.finish();
    });

    let report = coordinator
        .download_all(requests, &settings.save_folder, event_tx, cancel_on_ctrl_c())
        .await?;

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }

    println!(
        "{} {} downloaded, {} cached",
        style("✓").green(),
        report.downloaded,
        report.cached
    );
    if report.failed > 0 || report.invalid > 0 {
        println!(
            "{} {} failed, {} rows with invalid links",
            style("!").yellow(),
            report.failed,
            report.invalid
        );
    }
    if report.cancelled > 0 {
        println!(
            "{} {} downloads cancelled",
            style("!").yellow(),
            report.cancelled
        );
    }
    println!(
        "  {} {} of {} rows have a local image",
        style("→").dim(),
        report.resolved_rows(),
        rows.len()
    );
    if report.unresolved_rows() > 0 {
        println!(
            "  {} {} rows will be skipped by 'labelscan run' until their images download",
            style("→").dim(),
            report.unresolved_rows()
        );
    }
    Ok(())
}
