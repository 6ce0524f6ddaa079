//! Backend availability listing.

use console::style;

use crate::config::Settings;
use crate::ocr::{build_backend, OcrBackendType};
use crate::services::ner::{build_ner_backend, NerBackendType};

/// Print which OCR and NER backends can run on this machine.
pub async fn cmd_backends(settings: &Settings) -> anyhow::Result<()> {
    println!("\n{}", style("Backend Status").bold());
    println!("{}", "-".repeat(50));

    println!("\n{}", style("OCR Backends:").cyan());
    for backend_type in OcrBackendType::ALL {
        let marker = if backend_type == settings.ocr_backend { "*" } else { " " };
        let Some(backend) = build_backend(backend_type, settings.ocr_config()) else {
            println!(
                " {}{:<14} {}",
                marker,
                backend_type.as_str(),
                style(format!("not compiled (enable ocr-{} feature)", backend_type)).dim()
            );
            continue;
        };

        // Model-backed engines may fetch models here.
        let available = tokio::task::spawn_blocking({
            let backend = backend.clone();
            move || backend.is_available()
        })
        .await
        .unwrap_or(false);

        let status = if available {
            style("✓ available").green()
        } else {
            style("✗ not available").red()
        };
        println!(" {}{:<14} {}", marker, backend_type.as_str(), status);
        println!("                 {}", style(backend.availability_hint()).dim());
    }

    println!("\n{}", style("NER Backends:").cyan());
    for backend_type in NerBackendType::ALL {
        let marker = if backend_type == settings.ner_backend { "*" } else { " " };
        match build_ner_backend(backend_type, settings.ner_http_config()) {
            Ok(backend) => {
                let status = if backend.is_available().await {
                    style("✓ available").green()
                } else {
                    style("✗ not available").red()
                };
                println!(" {}{:<14} {}", marker, backend_type.as_str(), status);
                println!("                 {}", style(backend.availability_hint()).dim());
            }
            Err(e) => {
                println!(
                    " {}{:<14} {} {}",
                    marker,
                    backend_type.as_str(),
                    style("✗").red(),
                    e
                );
            }
        }
    }

    println!("\n  {} * marks the configured backend", style("→").dim());
    Ok(())
}
