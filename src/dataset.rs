//! Input and output tables.
//!
//! Input is a CSV file with an index column and an image link column
//! (optionally an entity name column). Output is CSV or JSON Lines with the
//! OCR text, entities as a JSON array and features as a JSON object.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::services::features::FeatureMap;
use crate::services::ner::EntitySpan;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {name}: {source}")]
    Csv { name: String, source: csv::Error },

    #[error("column '{column}' not found in {name}")]
    MissingColumn { column: String, name: String },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: String,
    pub image_link: Option<String>,
    pub entity_name: Option<String>,
}

/// Extraction result for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub index: String,
    pub entity_name: Option<String>,
    pub text: String,
    pub entities: Vec<EntitySpan>,
    pub features: FeatureMap,
}

/// Column names for input and output tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub index_column: String,
    pub link_column: String,
    pub entity_column: String,
    pub text_column: String,
    pub ner_column: String,
    pub regex_column: String,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            index_column: "index".to_string(),
            link_column: "image_link".to_string(),
            entity_column: "entity_name".to_string(),
            text_column: "text".to_string(),
            ner_column: "ner".to_string(),
            regex_column: "regex".to_string(),
        }
    }
}

/// Output table format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "jsonl" | "ndjson" => Some(OutputFormat::Jsonl),
            _ => None,
        }
    }
}

/// Load rows from a CSV file.
pub fn load_rows(path: &Path, schema: &TableSchema) -> Result<Vec<Row>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_rows(file, schema, &path.display().to_string())
}

/// Read rows from CSV. `name` identifies the source in errors.
///
/// Empty link cells become `None`; the entity column is optional.
pub fn read_rows<R: Read>(reader: R, schema: &TableSchema, name: &str) -> Result<Vec<Row>, DatasetError> {
    let csv_err = |source| DatasetError::Csv {
        name: name.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers().map_err(csv_err)?.clone();
    let position = |column: &str| headers.iter().position(|h| h.trim() == column);
    let require = |column: &str| {
        position(column).ok_or_else(|| DatasetError::MissingColumn {
            column: column.to_string(),
            name: name.to_string(),
        })
    };

    let index_at = require(&schema.index_column)?;
    let link_at = require(&schema.link_column)?;
    let entity_at = position(&schema.entity_column);

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let cell = |at: usize| {
            record
                .get(at)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let row = Row {
            index: cell(index_at).unwrap_or_default(),
            image_link: cell(link_at),
            entity_name: entity_at.and_then(cell),
        };
        if !seen.insert(row.index.clone()) {
            tracing::warn!("Duplicate index {:?} in {}", row.index, name);
        }
        rows.push(row);
    }

    tracing::info!("Loaded {} rows from {}", rows.len(), name);
    Ok(rows)
}

/// Write records to `path`, replacing any existing file only once the new
/// table is complete.
pub fn write_results(
    path: &Path,
    records: &[ResultRecord],
    schema: &TableSchema,
    format: OutputFormat,
) -> Result<(), DatasetError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut staged = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let writer = BufWriter::new(staged.as_file_mut());
        match format {
            OutputFormat::Csv => write_csv(writer, records, schema)?,
            OutputFormat::Jsonl => write_jsonl(writer, records, schema)?,
        }
    }
    staged.persist(path).map_err(|e| DatasetError::Io(e.error))?;

    tracing::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Write records as CSV. The entity column is included when any record
/// carries an entity name.
pub fn write_csv<W: Write>(writer: W, records: &[ResultRecord], schema: &TableSchema) -> Result<(), DatasetError> {
    let csv_err = |source| DatasetError::Csv {
        name: "output".to_string(),
        source,
    };
    let with_entity = records.iter().any(|r| r.entity_name.is_some());

    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec![
        schema.index_column.as_str(),
        schema.text_column.as_str(),
        schema.ner_column.as_str(),
        schema.regex_column.as_str(),
    ];
    if with_entity {
        header.push(schema.entity_column.as_str());
    }
    out.write_record(&header).map_err(csv_err)?;

    for record in records {
        let ner = serde_json::to_string(&record.entities)?;
        let regex = serde_json::to_string(&record.features)?;
        let mut fields = vec![
            record.index.as_str(),
            record.text.as_str(),
            ner.as_str(),
            regex.as_str(),
        ];
        if with_entity {
            fields.push(record.entity_name.as_deref().unwrap_or_default());
        }
        out.write_record(&fields).map_err(csv_err)?;
    }

    out.flush()?;
    Ok(())
}

/// Write one JSON object per line, keyed by the schema's output names.
pub fn write_jsonl<W: Write>(mut writer: W, records: &[ResultRecord], schema: &TableSchema) -> Result<(), DatasetError> {
    for record in records {
        let mut object = Map::new();
        object.insert(schema.index_column.clone(), json!(record.index));
        object.insert(schema.text_column.clone(), json!(record.text));
        object.insert(schema.ner_column.clone(), serde_json::to_value(&record.entities)?);
        object.insert(schema.regex_column.clone(), serde_json::to_value(&record.features)?);
        if let Some(ref entity) = record.entity_name {
            object.insert(schema.entity_column.clone(), json!(entity));
        }
        serde_json::to_writer(&mut writer, &Value::Object(object))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
