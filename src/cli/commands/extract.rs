//! Text-only extraction command.

use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::config::Settings;
use crate::services::features::{extract_features, FeatureMap, PATTERN_TABLE_VERSION};
use crate::services::ner::{create_ner_backend, EntitySpan};

#[derive(Debug, Serialize)]
struct Extraction<'a> {
    text: &'a str,
    ner: Vec<EntitySpan>,
    regex: FeatureMap,
    pattern_table_version: u32,
}

/// Run NER and the unit patterns over `text` (or stdin) and print JSON.
pub async fn cmd_extract(settings: &Settings, text: Option<String>, no_ner: bool) -> anyhow::Result<()> {
    let text = match text {
        Some(text) if text != "-" => text,
        _ => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let ner = if no_ner {
        Vec::new()
    } else {
        let backend = create_ner_backend(settings.ner_backend, settings.ner_http_config()).await?;
        backend.extract(&text).await?
    };

    let extraction = Extraction {
        text: &text,
        ner,
        regex: extract_features(&text),
        pattern_table_version: PATTERN_TABLE_VERSION,
    };
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}
