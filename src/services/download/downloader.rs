//! Single-image downloader with bounded retries.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::fetcher::ImageFetcher;
use super::link::ImageLink;
use super::types::{DownloadError, DownloadStatus};

/// Attempt counter with a fixed delay between attempts.
///
/// Starts on attempt 1; at least one attempt is always made.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Current 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Move to the next attempt, or `None` when the budget is spent.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Downloads one image into a folder, retrying transient failures.
pub struct Downloader {
    fetcher: Arc<dyn ImageFetcher>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            fetcher,
            max_retries,
            retry_delay,
        }
    }

    /// Parse `link` and download it into `folder`.
    pub async fn download(
        &self,
        link: Option<&str>,
        folder: &Path,
    ) -> Result<(PathBuf, DownloadStatus), DownloadError> {
        let link = ImageLink::parse(link)?;
        self.download_link(&link, folder).await
    }

    /// Download an already validated link.
    ///
    /// An existing file of the same name is returned without fetching.
    /// Nothing is written unless a fetch succeeds.
    pub async fn download_link(
        &self,
        link: &ImageLink,
        folder: &Path,
    ) -> Result<(PathBuf, DownloadStatus), DownloadError> {
        let dest = folder.join(link.filename());
        if tokio::fs::try_exists(&dest).await? {
            tracing::info!("Image already present: {}", dest.display());
            return Ok((dest, DownloadStatus::Cached));
        }

        let mut retry = RetryState::new(self.max_retries, self.retry_delay);
        loop {
            tracing::debug!("Fetching {} (attempt {})", link, retry.attempt());

            let error = match self.fetcher.fetch(link.url()).await {
                Ok(bytes) => {
                    let status = persist(folder.to_path_buf(), dest.clone(), bytes).await?;
                    if status == DownloadStatus::Downloaded {
                        tracing::info!("Downloaded {} -> {}", link, dest.display());
                    }
                    return Ok((dest, status));
                }
                Err(e) => e,
            };

            let failed_attempt = retry.attempt();
            if retry.next_attempt().is_none() {
                tracing::error!(
                    "Failed to download {} after {} attempts: {}",
                    link,
                    failed_attempt,
                    error
                );
                return Err(DownloadError::Exhausted {
                    link: link.to_string(),
                    attempts: failed_attempt,
                    source: error,
                });
            }

            tracing::warn!(
                "Attempt {} for {} failed: {}. Retrying in {:?}",
                failed_attempt,
                link,
                error,
                retry.delay()
            );
            tokio::time::sleep(retry.delay()).await;
        }
    }
}

/// Stage `bytes` in a temp file inside `folder` and move it to `dest`
/// without replacing an existing file.
///
/// Losing the race to another writer of the same name counts as a cache hit.
async fn persist(folder: PathBuf, dest: PathBuf, bytes: Vec<u8>) -> Result<DownloadStatus, DownloadError> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&folder)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&folder)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;

        match staged.persist_noclobber(&dest) {
            Ok(_) => Ok(DownloadStatus::Downloaded),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::info!("Image already present: {}", dest.display());
                Ok(DownloadStatus::Cached)
            }
            Err(e) => Err(DownloadError::Io(e.error)),
        }
    })
    .await
    .map_err(|e| DownloadError::Io(std::io::Error::other(e)))?
}
