//! Download service types, errors and events.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Why a single fetch attempt failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported link scheme: {0}")]
    UnsupportedScheme(String),
}

/// Errors from downloading one image.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The link is missing or cannot name a local file. Never retried.
    #[error("invalid link {link:?}: {reason}")]
    InvalidLink { link: String, reason: String },

    /// Every attempt failed; carries the last failure.
    #[error("giving up on {link} after {attempts} attempts: {source}")]
    Exhausted {
        link: String,
        attempts: u32,
        source: FetchError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted before this download started.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn invalid(link: &str, reason: impl Into<String>) -> Self {
        DownloadError::InvalidLink {
            link: link.to_string(),
            reason: reason.into(),
        }
    }
}

/// How a successful download was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Bytes were fetched and a new file written.
    Downloaded,
    /// The file already existed; nothing was fetched.
    Cached,
}

/// Events emitted during download operations.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Number of unique files about to be processed.
    Queued { total: usize },
    Started { link: String, filename: String },
    Completed {
        filename: String,
        status: DownloadStatus,
    },
    Failed { link: String, error: String },
    /// A row's link was rejected before queueing.
    Invalid {
        row: usize,
        link: String,
        error: String,
    },
    /// A queued file was not started because the run was cancelled.
    Cancelled { filename: String },
}

/// Configuration for the downloader and coordinator.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("labelscan/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Outcome for one row. Rows sharing a file share the error.
pub type DownloadOutcome = Result<PathBuf, Arc<DownloadError>>;

/// Result of a coordinated download.
///
/// `outcomes` is keyed by row position. The counters count unique files,
/// except `invalid`, which counts rows whose link could not be parsed.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub outcomes: BTreeMap<usize, DownloadOutcome>,
    pub downloaded: usize,
    pub cached: usize,
    pub failed: usize,
    pub invalid: usize,
    pub cancelled: usize,
}

impl DownloadReport {
    pub fn path_for(&self, row: usize) -> Option<&Path> {
        match self.outcomes.get(&row) {
            Some(Ok(path)) => Some(path.as_path()),
            _ => None,
        }
    }

    pub fn error_for(&self, row: usize) -> Option<&DownloadError> {
        match self.outcomes.get(&row) {
            Some(Err(e)) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Rows that ended with a local file.
    pub fn resolved_rows(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    /// Rows without a local file, for any reason.
    pub fn unresolved_rows(&self) -> usize {
        self.outcomes.len() - self.resolved_rows()
    }
}
