//! Configuration management for labelscan using the prefer crate.
//!
//! Settings are resolved in layers: built-in defaults, then the config file
//! (explicit `--config` or discovered by prefer), then `LABELSCAN_*`
//! environment variables. CLI flags are applied last by the command layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{OutputFormat, TableSchema};
use crate::ocr::{OcrBackendType, OcrConfig};
use crate::services::download::DownloadConfig;
use crate::services::ner::{HttpNerConfig, NerBackendType};

/// Base URL for hosted token-classification models.
pub const HF_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";

/// Default NER model on the hosted inference API.
pub const DEFAULT_NER_MODEL: &str = "dslim/bert-base-NER";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "LABELSCAN_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Application settings, fully resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Input CSV.
    pub input_path: PathBuf,
    /// Output table.
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    /// Folder downloaded images are saved to.
    pub save_folder: PathBuf,
    /// Concurrent downloads.
    pub workers: usize,
    /// Attempts per image, including the first.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Rows per OCR/NER batch.
    pub batch_size: usize,
    pub ocr_backend: OcrBackendType,
    /// Tesseract language code(s), e.g. "eng" or "eng+deu".
    pub ocr_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_model_dir: Option<PathBuf>,
    pub ner_backend: NerBackendType,
    /// Explicit inference endpoint; derived from `ner_model` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ner_endpoint: Option<String>,
    pub ner_model: String,
    #[serde(skip)]
    pub ner_api_token: Option<String>,
    pub columns: TableSchema,
}

impl Default for Settings {
    fn default() -> Self {
        let download = DownloadConfig::default();
        Self {
            input_path: PathBuf::from("dataset/test.csv"),
            output_path: PathBuf::from("output/results.csv"),
            output_format: OutputFormat::Csv,
            save_folder: PathBuf::from("images"),
            workers: download.workers,
            max_retries: download.max_retries,
            retry_delay_ms: download.retry_delay.as_millis() as u64,
            request_timeout: download.request_timeout.as_secs(),
            user_agent: download.user_agent,
            batch_size: 10,
            ocr_backend: OcrBackendType::Tesseract,
            ocr_language: "eng".to_string(),
            ocr_model_dir: None,
            ner_backend: NerBackendType::Rules,
            ner_endpoint: None,
            ner_model: DEFAULT_NER_MODEL.to_string(),
            ner_api_token: None,
            columns: TableSchema::default(),
        }
    }
}

impl Settings {
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            workers: self.workers,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn ocr_config(&self) -> OcrConfig {
        OcrConfig {
            language: self.ocr_language.clone(),
            model_path: self.ocr_model_dir.clone(),
        }
    }

    /// The NER endpoint in effect: explicit, or derived from the model name.
    pub fn effective_ner_endpoint(&self) -> String {
        self.ner_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/{}", HF_INFERENCE_BASE, self.ner_model))
    }

    pub fn ner_http_config(&self) -> HttpNerConfig {
        HttpNerConfig {
            endpoint: Some(self.effective_ner_endpoint()),
            api_token: self.ner_api_token.clone(),
            timeout: Duration::from_secs(self.request_timeout.max(1) * 2),
            ..HttpNerConfig::default()
        }
    }

    /// Apply `LABELSCAN_*` overrides (and `HF_API_TOKEN`) read through
    /// `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).filter(|v| !v.is_empty()).map(|v| (key, v))
        };

        if let Some((_, v)) = var("INPUT") {
            self.input_path = expand_path(&v);
        }
        if let Some((_, v)) = var("OUTPUT") {
            self.output_path = expand_path(&v);
        }
        if let Some((key, v)) = var("FORMAT") {
            self.output_format = parse_with(&key, &v, OutputFormat::from_str)?;
        }
        if let Some((_, v)) = var("SAVE_FOLDER") {
            self.save_folder = expand_path(&v);
        }
        if let Some((key, v)) = var("WORKERS") {
            self.workers = parse_number(&key, &v)?;
        }
        if let Some((key, v)) = var("MAX_RETRIES") {
            self.max_retries = parse_number(&key, &v)?;
        }
        if let Some((key, v)) = var("RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_number(&key, &v)?;
        }
        if let Some((key, v)) = var("REQUEST_TIMEOUT") {
            self.request_timeout = parse_number(&key, &v)?;
        }
        if let Some((_, v)) = var("USER_AGENT") {
            self.user_agent = v;
        }
        if let Some((key, v)) = var("BATCH_SIZE") {
            self.batch_size = parse_number(&key, &v)?;
        }
        if let Some((key, v)) = var("OCR_BACKEND") {
            self.ocr_backend = parse_with(&key, &v, OcrBackendType::from_str)?;
        }
        if let Some((_, v)) = var("OCR_LANGUAGE") {
            self.ocr_language = v;
        }
        if let Some((key, v)) = var("NER_BACKEND") {
            self.ner_backend = parse_with(&key, &v, NerBackendType::from_str)?;
        }
        if let Some((_, v)) = var("NER_ENDPOINT") {
            self.ner_endpoint = Some(v);
        }
        if let Some((_, v)) = var("NER_MODEL") {
            self.ner_model = v;
        }
        if let Some(token) = lookup("HF_API_TOKEN").filter(|v| !v.is_empty()) {
            self.ner_api_token = Some(token);
        }
        Ok(())
    }
}

/// OCR section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,
}

/// NER section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input CSV path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Output table path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Image save folder.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "images")]
    pub save_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub ner: NerSection,
    /// Column names; unspecified names keep their defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<TableSchema>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a labelscan config file in standard locations via prefer.
    ///
    /// Returns the default config when no file is found.
    pub async fn load() -> Result<Self, ConfigError> {
        let discovered = match prefer::load("labelscan").await {
            Ok(pref_config) => pref_config.source_path().map(|p| p.to_path_buf()),
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                None
            }
        };

        match discovered {
            Some(path) => {
                tracing::debug!("Using discovered config: {}", path.display());
                Self::load_from_path(&path).await
            }
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = expand_path(path_str);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) -> Result<(), ConfigError> {
        if let Some(ref input) = self.input {
            settings.input_path = self.resolve_path(input, base_dir);
        }
        if let Some(ref output) = self.output {
            settings.output_path = self.resolve_path(output, base_dir);
        }
        if let Some(ref format) = self.format {
            settings.output_format = parse_with("format", format, OutputFormat::from_str)?;
        }
        if let Some(ref folder) = self.save_folder {
            settings.save_folder = self.resolve_path(folder, base_dir);
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            settings.retry_delay_ms = delay;
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }

        if let Some(ref backend) = self.ocr.backend {
            settings.ocr_backend = parse_with("ocr.backend", backend, OcrBackendType::from_str)?;
        }
        if let Some(ref language) = self.ocr.language {
            settings.ocr_language = language.clone();
        }
        if let Some(ref dir) = self.ocr.model_dir {
            settings.ocr_model_dir = Some(self.resolve_path(dir, base_dir));
        }

        if let Some(ref backend) = self.ner.backend {
            settings.ner_backend = parse_with("ner.backend", backend, NerBackendType::from_str)?;
        }
        if let Some(ref endpoint) = self.ner.endpoint {
            settings.ner_endpoint = Some(endpoint.clone());
        }
        if let Some(ref model) = self.ner.model {
            settings.ner_model = model.clone();
        }
        if let Some(ref token) = self.ner.api_token {
            settings.ner_api_token = Some(token.clone());
        }

        if let Some(ref columns) = self.columns {
            settings.columns = columns.clone();
        }
        Ok(())
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    let mut settings = Settings::default();

    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd()
    } else {
        config.base_dir().unwrap_or_else(cwd)
    };

    config.apply_to_settings(&mut settings, &base_dir)?;
    settings.apply_env(|key| std::env::var(key).ok())?;

    Ok((settings, config))
}

/// Expand `~` and environment references in a path.
pub fn expand_path(path_str: &str) -> PathBuf {
    let expanded = shellexpand::full(path_str)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path_str).into_owned());
    PathBuf::from(expanded)
}

fn parse_with<T>(key: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, ConfigError> {
    parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
