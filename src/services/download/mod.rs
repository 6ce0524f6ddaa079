//! Image download service.
//!
//! Fans a set of row links out over a bounded worker pool. Separated from
//! UI concerns - emits events for progress tracking.

mod downloader;
mod fetcher;
mod link;
mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use downloader::{Downloader, RetryState};
pub use fetcher::{HttpFetcher, ImageFetcher};
pub use link::ImageLink;
pub use types::{
    DownloadConfig, DownloadError, DownloadEvent, DownloadOutcome, DownloadReport,
    DownloadStatus, FetchError,
};

/// One row's link, identified by the row's position in the input.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub row: usize,
    pub link: Option<String>,
}

/// Rows that resolve to the same local file.
struct FileGroup {
    link: ImageLink,
    rows: Vec<usize>,
}

/// Coordinates concurrent downloads into one folder.
pub struct DownloadCoordinator {
    downloader: Arc<Downloader>,
    workers: usize,
}

impl DownloadCoordinator {
    pub fn new(downloader: Arc<Downloader>, workers: usize) -> Self {
        Self {
            downloader,
            workers: workers.max(1),
        }
    }

    /// Build a coordinator over an HTTP fetcher from `config`.
    pub fn from_config(config: &DownloadConfig) -> Result<Self, FetchError> {
        let fetcher = Arc::new(HttpFetcher::new(config)?);
        let downloader = Downloader::new(fetcher, config.max_retries, config.retry_delay);
        Ok(Self::new(Arc::new(downloader), config.workers))
    }

    /// Download every request into `folder`.
    ///
    /// Individual failures are recorded in the report and never abort the
    /// batch. Only failing to create `folder` is an error. Links naming the
    /// same file are fetched once and all their rows share the outcome.
    /// After `cancel` fires no new download starts; in-flight ones finish.
    pub async fn download_all(
        &self,
        requests: Vec<DownloadRequest>,
        folder: &Path,
        event_tx: mpsc::Sender<DownloadEvent>,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        if !tokio::fs::try_exists(folder).await? {
            tracing::info!("Creating image folder {}", folder.display());
        }
        tokio::fs::create_dir_all(folder).await?;

        let mut report = DownloadReport::default();
        let groups = group_requests(requests, &mut report, &event_tx).await;

        let _ = event_tx
            .send(DownloadEvent::Queued {
                total: groups.len(),
            })
            .await;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<(usize, Result<(PathBuf, DownloadStatus), DownloadError>)> =
            JoinSet::new();

        for (group_id, group) in groups.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            let downloader = self.downloader.clone();
            let link = group.link.clone();
            let folder = folder.to_path_buf();
            let event_tx = event_tx.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let _ = event_tx
                    .send(DownloadEvent::Started {
                        link: link.to_string(),
                        filename: link.filename().to_string(),
                    })
                    .await;

                let result = downloader.download_link(&link, &folder).await;

                let event = match &result {
                    Ok((_, status)) => DownloadEvent::Completed {
                        filename: link.filename().to_string(),
                        status: *status,
                    },
                    Err(e) => DownloadEvent::Failed {
                        link: link.to_string(),
                        error: e.to_string(),
                    },
                };
                let _ = event_tx.send(event).await;

                (group_id, result)
            });
        }

        let mut finished = vec![false; groups.len()];
        while let Some(joined) = tasks.join_next().await {
            let (group_id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!("Download task panicked: {}", e);
                    continue;
                }
            };
            finished[group_id] = true;

            let group = &groups[group_id];
            let outcome: DownloadOutcome = match result {
                Ok((path, DownloadStatus::Downloaded)) => {
                    report.downloaded += 1;
                    Ok(path)
                }
                Ok((path, DownloadStatus::Cached)) => {
                    report.cached += 1;
                    Ok(path)
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Rows {:?}: {}", group.rows, e);
                    Err(Arc::new(e))
                }
            };
            for &row in &group.rows {
                report.outcomes.insert(row, outcome.clone());
            }
        }

        // Groups never started: cancelled before a worker was free.
        let cancelled = Arc::new(DownloadError::Cancelled);
        for (group, _) in groups.iter().zip(&finished).filter(|(_, done)| !**done) {
            report.cancelled += 1;
            let _ = event_tx
                .send(DownloadEvent::Cancelled {
                    filename: group.link.filename().to_string(),
                })
                .await;
            for &row in &group.rows {
                report.outcomes.insert(row, Err(cancelled.clone()));
            }
        }

        tracing::info!(
            "Downloads: {} new, {} cached, {} failed, {} invalid, {} cancelled",
            report.downloaded,
            report.cached,
            report.failed,
            report.invalid,
            report.cancelled
        );
        Ok(report)
    }
}

/// Parse links and group rows by target filename, first occurrence first.
/// Invalid links are recorded in `report` directly.
async fn group_requests(
    requests: Vec<DownloadRequest>,
    report: &mut DownloadReport,
    event_tx: &mpsc::Sender<DownloadEvent>,
) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();
    let mut by_filename: HashMap<String, usize> = HashMap::new();

    for request in requests {
        match ImageLink::parse(request.link.as_deref()) {
            Ok(link) => match by_filename.get(link.filename()) {
                Some(&existing) => groups[existing].rows.push(request.row),
                None => {
                    by_filename.insert(link.filename().to_string(), groups.len());
                    groups.push(FileGroup {
                        link,
                        rows: vec![request.row],
                    });
                }
            },
            Err(e) => {
                tracing::warn!("Row {}: {}", request.row, e);
                report.invalid += 1;
                let _ = event_tx
                    .send(DownloadEvent::Invalid {
                        row: request.row,
                        link: request.link.unwrap_or_default(),
                        error: e.to_string(),
                    })
                    .await;
                report.outcomes.insert(request.row, Err(Arc::new(e)));
            }
        }
    }

    groups
}
