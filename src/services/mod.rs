//! Service layer for labelscan.
//!
//! This module contains domain logic separated from UI concerns.
//! Services report progress over channels and never print.

pub mod download;
pub mod features;
pub mod ner;
pub mod pipeline;

pub use download::{
    DownloadConfig, DownloadCoordinator, DownloadError, DownloadEvent, DownloadReport,
    DownloadRequest, Downloader, HttpFetcher, ImageFetcher,
};
pub use features::{extract_features, FeatureMap, PATTERN_TABLE_VERSION};
pub use ner::{EntitySpan, NerBackend, NerBackendType, NerError};
pub use pipeline::{Pipeline, PipelineEvent, PipelineOutput, RunSummary, SkipReason};
