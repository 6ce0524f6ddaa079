//! CLI command definitions and dispatch.

mod backends;
mod config_cmd;
mod download;
mod extract;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::{load_settings_with_options, LoadOptions, Settings};
use crate::dataset::OutputFormat;
use crate::ocr::OcrBackendType;
use crate::services::ner::NerBackendType;

#[derive(Parser)]
#[command(name = "labelscan")]
#[command(about = "Extract product attributes from label images")]
#[command(version)]
pub struct Cli {
    /// Path to config file (overrides auto-discovery)
    #[arg(short, long, global = true, env = "LABELSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Resolve relative paths against the current directory instead of the config file's
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download images, run OCR and NER, and write the results table
    Run {
        #[command(flatten)]
        download: DownloadArgs,

        #[command(flatten)]
        extract: ExtractArgs,

        /// Output table path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Only download the images referenced by the input table
    Download {
        #[command(flatten)]
        download: DownloadArgs,
    },

    /// Extract entities and attributes from text (argument or stdin)
    Extract {
        /// Text to analyze; reads stdin when omitted or "-"
        text: Option<String>,

        /// NER backend to use
        #[arg(long, value_parser = parse_ner_backend)]
        ner_backend: Option<NerBackendType>,

        /// Skip entity recognition
        #[arg(long)]
        no_ner: bool,
    },

    /// List OCR and NER backends and whether they can run here
    Backends,

    /// Print the effective settings as TOML
    Config,
}

/// Flags shared by commands that download.
#[derive(Args, Debug, Default)]
struct DownloadArgs {
    /// Input table (CSV with index and image_link columns)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Folder downloaded images are saved to
    #[arg(short, long)]
    save_folder: Option<PathBuf>,

    /// Number of concurrent downloads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per image
    #[arg(long)]
    retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

impl DownloadArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref input) = self.input {
            settings.input_path = input.clone();
        }
        if let Some(ref folder) = self.save_folder {
            settings.save_folder = folder.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(retries) = self.retries {
            settings.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            settings.retry_delay_ms = delay;
        }
    }
}

/// Flags for the OCR and NER stages.
#[derive(Args, Debug, Default)]
struct ExtractArgs {
    /// Rows per OCR/NER batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// OCR backend (tesseract, ocrs)
    #[arg(long, value_parser = parse_ocr_backend)]
    ocr_backend: Option<OcrBackendType>,

    /// OCR language, e.g. "eng" or "eng+deu"
    #[arg(long)]
    language: Option<String>,

    /// NER backend (rules, http)
    #[arg(long, value_parser = parse_ner_backend)]
    ner_backend: Option<NerBackendType>,

    /// NER inference endpoint for the http backend
    #[arg(long)]
    ner_endpoint: Option<String>,
}

impl ExtractArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(backend) = self.ocr_backend {
            settings.ocr_backend = backend;
        }
        if let Some(ref language) = self.language {
            settings.ocr_language = language.clone();
        }
        if let Some(backend) = self.ner_backend {
            settings.ner_backend = backend;
        }
        if let Some(ref endpoint) = self.ner_endpoint {
            settings.ner_endpoint = Some(endpoint.clone());
        }
    }
}

fn parse_ocr_backend(s: &str) -> Result<OcrBackendType, String> {
    OcrBackendType::from_str(s).ok_or_else(|| {
        let names: Vec<_> = OcrBackendType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown OCR backend '{}' (expected one of: {})", s, names.join(", "))
    })
}

fn parse_ner_backend(s: &str) -> Result<NerBackendType, String> {
    NerBackendType::from_str(s).ok_or_else(|| {
        let names: Vec<_> = NerBackendType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown NER backend '{}' (expected one of: {})", s, names.join(", "))
    })
}

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Interrupted; finishing in-flight work",
                console::style("!").yellow()
            );
            token.cancel();
        }
    });
    cancel
}

/// Check if verbose mode is enabled (before full parsing).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config.clone(),
        use_cwd: cli.cwd,
    };
    let (mut settings, config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Run {
            download,
            extract,
            output,
            format,
        } => {
            download.apply(&mut settings);
            extract.apply(&mut settings);
            if let Some(output) = output {
                settings.output_path = output;
            }
            if let Some(format) = format {
                settings.output_format = format;
            }
            run::cmd_run(&settings, !download.no_progress).await
        }
        Commands::Download { download } => {
            download.apply(&mut settings);
            download::cmd_download(&settings, !download.no_progress).await
        }
        Commands::Extract {
            text,
            ner_backend,
            no_ner,
        } => {
            if let Some(backend) = ner_backend {
                settings.ner_backend = backend;
            }
            extract::cmd_extract(&settings, text, no_ner).await
        }
        Commands::Backends => backends::cmd_backends(&settings).await,
        Commands::Config => config_cmd::cmd_config(&settings, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "labelscan",
            "run",
            "--input",
            "data.csv",
            "--workers",
            "4",
            "--batch-size",
            "25",
            "--ocr-backend",
            "ocrs",
            "--ner-backend",
            "hf",
            "--format",
            "jsonl",
        ])
        .unwrap();

        let Commands::Run {
            download,
            extract,
            format,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };

        let mut settings = Settings::default();
        download.apply(&mut settings);
        extract.apply(&mut settings);

        assert_eq!(settings.input_path, PathBuf::from("data.csv"));
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.ocr_backend, OcrBackendType::Ocrs);
        assert_eq!(settings.ner_backend, NerBackendType::Http);
        assert_eq!(format, Some(OutputFormat::Jsonl));
        assert_eq!(settings.max_retries, Settings::default().max_retries);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = Cli::try_parse_from(["labelscan", "run", "--ocr-backend", "easyocr"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["labelscan", "extract", "5 kg", "-v", "--no-ner"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Extract { no_ner: true, .. }
        ));
    }
}
