//! Progress display for download and extraction runs.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::services::download::{DownloadEvent, DownloadStatus};
use crate::services::pipeline::PipelineEvent;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:>9} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Running counts shown next to the bars and in the final summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadTally {
    pub downloaded: usize,
    pub cached: usize,
    pub failed: usize,
}

impl DownloadTally {
    fn message(&self) -> String {
        format!(
            "{} new, {} cached, {} failed",
            self.downloaded, self.cached, self.failed
        )
    }
}

/// Bars for one run. With progress disabled, failures still go to stderr.
pub struct RunProgress {
    multi: Option<MultiProgress>,
    downloads: Option<ProgressBar>,
    extraction: Option<ProgressBar>,
    tally: DownloadTally,
}

impl RunProgress {
    pub fn new(show_progress: bool) -> Self {
        Self {
            multi: show_progress.then(MultiProgress::new),
            downloads: None,
            extraction: None,
            tally: DownloadTally::default(),
        }
    }

    fn add_bar(&self, prefix: &'static str, len: usize) -> Option<ProgressBar> {
        let multi = self.multi.as_ref()?;
        let bar = multi.add(ProgressBar::new(len as u64));
        bar.set_style(bar_style());
        bar.set_prefix(prefix);
        Some(bar)
    }

    /// Print a line without tearing the bars.
    pub fn println(&self, line: &str) {
        match &self.multi {
            Some(multi) => {
                let _ = multi.println(line);
            }
            None => eprintln!("{}", line),
        }
    }

    pub fn on_download(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Queued { total } => {
                self.downloads = self.add_bar("download", total);
            }
            DownloadEvent::Started { filename, .. } => {
                if let Some(ref bar) = self.downloads {
                    bar.set_message(filename);
                }
            }
            DownloadEvent::Completed { status, .. } => {
                match status {
                    DownloadStatus::Downloaded => self.tally.downloaded += 1,
                    DownloadStatus::Cached => self.tally.cached += 1,
                }
                if let Some(ref bar) = self.downloads {
                    bar.set_message(self.tally.message());
                    bar.inc(1);
                }
            }
            DownloadEvent::Failed { link, error } => {
                self.tally.failed += 1;
                self.println(&format!(
                    "{} Failed to download {}: {}",
                    style("✗").red(),
                    link,
                    error
                ));
                if let Some(ref bar) = self.downloads {
                    bar.set_message(self.tally.message());
                    bar.inc(1);
                }
            }
            DownloadEvent::Invalid { row, link, error } => {
                tracing::debug!("Row {} rejected ({:?}): {}", row, link, error);
            }
            DownloadEvent::Cancelled { .. } => {
                if let Some(ref bar) = self.downloads {
                    bar.inc(1);
                }
            }
        }
    }

    pub fn on_pipeline(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Download(event) => self.on_download(event),
            PipelineEvent::ExtractionStarted { rows } => {
                if let Some(bar) = self.downloads.take() {
                    bar.finish_with_message(self.tally.message());
                }
                self.extraction = self.add_bar("extract", rows);
            }
            PipelineEvent::BatchStarted { batch, rows } => {
                if let Some(ref bar) = self.extraction {
                    bar.set_message(format!("batch {} ({} rows)", batch + 1, rows));
                }
            }
            PipelineEvent::RowFinished { .. } => {
                if let Some(ref bar) = self.extraction {
                    bar.inc(1);
                }
            }
            PipelineEvent::RowSkipped { row, reason } => {
                // Download-stage skips arrive before the extraction bar exists.
                if let Some(ref bar) = self.extraction {
                    bar.inc(1);
                    tracing::debug!("Row {} skipped: {}", row, reason);
                }
            }
        }
    }

    /// Finish all bars and return the download counts.
    pub fn finish(mut self) -> DownloadTally {
        if let Some(bar) = self.downloads.take() {
            bar.finish_with_message(self.tally.message());
        }
        if let Some(bar) = self.extraction.take() {
            bar.finish_and_clear();
        }
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_without_bars() {
        let mut progress = RunProgress::new(false);
        progress.on_download(DownloadEvent::Queued { total: 3 });
        progress.on_download(DownloadEvent::Completed {
            filename: "a.jpg".to_string(),
            status: DownloadStatus::Downloaded,
        });
        progress.on_download(DownloadEvent::Completed {
            filename: "b.jpg".to_string(),
            status: DownloadStatus::Cached,
        });
        progress.on_download(DownloadEvent::Failed {
            link: "https://example.com/c.jpg".to_string(),
            error: "HTTP 404".to_string(),
        });

        let tally = progress.finish();
        assert_eq!(tally.downloaded, 1);
        assert_eq!(tally.cached, 1);
        assert_eq!(tally.failed, 1);
    }

    #[test]
    fn test_extraction_events_before_bar_are_ignored() {
        let mut progress = RunProgress::new(false);
        progress.on_pipeline(PipelineEvent::RowSkipped {
            row: 0,
            reason: crate::services::pipeline::SkipReason::InvalidLink,
        });
        progress.on_pipeline(PipelineEvent::ExtractionStarted { rows: 2 });
        progress.on_pipeline(PipelineEvent::RowFinished { row: 1 });
        assert_eq!(progress.finish().failed, 0);
    }
}
