//! Export serializers for the value types
//!
//! Thin JSON/CSV/JSONL writers with optional gzip compression. These sit
//! outside the safety surface: they serialize data the caller already
//! holds, touching neither the vocabulary nor any warehouse.

use flate2::write::GzEncoder;
use flate2::Compression;
use omop_mcp_core::error::ServerError;
use omop_mcp_core::model::{Concept, Row};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Jsonl,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "jsonl" | "ndjson" => Some(Self::Jsonl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        }
    }
}

/// Serialize any value as pretty JSON bytes
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ServerError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| ServerError::invalid_request(format!("serialization failed: {e}")))
}

/// Compact single-line JSON bytes, for JSONL records
pub fn to_json_bytes_compact<T: Serialize>(value: &T) -> Result<Vec<u8>, ServerError> {
    serde_json::to_vec(value)
        .map_err(|e| ServerError::invalid_request(format!("serialization failed: {e}")))
}

/// One JSON document per line
pub fn rows_to_jsonl(rows: &[Row]) -> Result<Vec<u8>, ServerError> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row)
            .map_err(|e| ServerError::invalid_request(format!("serialization failed: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Rows as CSV with the header taken from the union of keys in order of
/// first appearance
pub fn rows_to_csv(rows: &[Row]) -> Result<Vec<u8>, ServerError> {
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| csv_error(e.to_string()))?;
    for row in rows {
        let record: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer.write_record(&record).map_err(|e| csv_error(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv_error(e.to_string()))
}

/// Concept sets flatten to a fixed CSV column set
pub fn concepts_to_csv(concepts: &[Concept]) -> Result<Vec<u8>, ServerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "concept_id",
            "concept_name",
            "domain",
            "vocabulary_id",
            "concept_class_id",
            "standard_concept",
            "concept_code",
        ])
        .map_err(|e| csv_error(e.to_string()))?;
    for concept in concepts {
        writer
            .write_record([
                concept.concept_id.to_string(),
                concept.concept_name.clone(),
                concept.domain.as_str().to_string(),
                concept.vocabulary_id.clone(),
                concept.concept_class_id.clone(),
                serde_json::to_value(concept.standard_concept)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                concept.concept_code.clone(),
            ])
            .map_err(|e| csv_error(e.to_string()))?;
    }
    writer.into_inner().map_err(|e| csv_error(e.to_string()))
}

fn csv_error(message: String) -> ServerError {
    ServerError::invalid_request(format!("CSV serialization failed: {message}"))
}

/// Write bytes to disk, gzip-compressed when asked. Returns bytes written.
pub fn write_bytes(path: &Path, bytes: &[u8], gzip: bool) -> Result<u64, ServerError> {
    let io_error =
        |e: std::io::Error| ServerError::invalid_request(format!("export write failed: {e}"));

    if gzip {
        let file = std::fs::File::create(path).map_err(io_error)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes).map_err(io_error)?;
        let file = encoder.finish().map_err(io_error)?;
        let written = file.metadata().map_err(io_error)?.len();
        Ok(written)
    } else {
        std::fs::write(path, bytes).map_err(io_error)?;
        Ok(bytes.len() as u64)
    }
}
