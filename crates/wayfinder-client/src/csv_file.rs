//! Community directory CSV exports read from disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use wayfinder_core::error::AppError;
use wayfinder_core::job::ExtractConfig;
use wayfinder_core::mapping::{FieldMapping, SourceDescriptor, normalize_record};
use wayfinder_core::models::{RawRecord, Service};
use wayfinder_core::traits::SourceAdapter;

/// One CSV file, header row first. Each row becomes a raw record keyed by
/// header; empty cells are left out.
#[derive(Debug, Clone)]
pub struct CsvFileAdapter {
    path: PathBuf,
    delimiter: u8,
    descriptor: SourceDescriptor,
    mapping: FieldMapping,
}

impl CsvFileAdapter {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            descriptor: SourceDescriptor::new(name, "community", "csv_import"),
            mapping: FieldMapping::standard(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_rows(
    path: &Path,
    delimiter: u8,
    limit: usize,
    source_name: &str,
) -> Result<Vec<RawRecord>, AppError> {
    let malformed = |message: String| AppError::MalformedResponse {
        source_name: source_name.to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| match e.kind() {
            csv::ErrorKind::Io(io) => {
                AppError::IoError(format!("{}: {io}", path.display()))
            }
            _ => malformed(e.to_string()),
        })?;

    let headers = reader
        .headers()
        .map_err(|e| malformed(format!("unreadable header row: {e}")))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        if records.len() >= limit {
            break;
        }
        let row = row.map_err(|e| malformed(e.to_string()))?;
        let record: RawRecord = headers
            .iter()
            .zip(row.iter())
            .filter(|(header, cell)| !header.is_empty() && !cell.is_empty())
            .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
            .collect();
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

#[async_trait]
impl SourceAdapter for CsvFileAdapter {
    fn name(&self) -> &str {
        &self.descriptor.source_name
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        limit: usize,
        _config: &ExtractConfig,
    ) -> Result<Vec<RawRecord>, AppError> {
        let path = self.path.clone();
        let delimiter = self.delimiter;
        let source_name = self.descriptor.source_name.clone();
        tracing::debug!(source = %source_name, path = %path.display(), "Reading CSV");

        tokio::task::spawn_blocking(move || read_rows(&path, delimiter, limit, &source_name))
            .await
            .map_err(|e| AppError::AdapterError {
                source_name: self.descriptor.source_name.clone(),
                message: format!("CSV reader task failed: {e}"),
            })?
    }

    fn normalize(&self, raw: &RawRecord) -> Option<Service> {
        normalize_record(raw, &self.mapping, &self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn reads_rows_up_to_limit() {
        let file = csv_file(
            "id,service_name,organisation,suburb,postcode,categories\n\
             1,Valley Food Pantry,St Vincent de Paul,Fortitude Valley,4006,Food; Emergency Relief\n\
             2,Youth Drop-in,YFS,Logan Central,4114,\n\
             3,Legal Clinic,Caxton Legal,West End,4101,Legal\n",
        );
        let adapter = CsvFileAdapter::new("csv", file.path());

        let records = adapter.extract(2, &ExtractConfig::default()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(!records[1].contains_key("categories"));

        let service = adapter.normalize(&records[0]).unwrap();
        assert_eq!(service.name, "Valley Food Pantry");
        assert_eq!(service.categories.len(), 2);
        assert_eq!(service.location.postcode.as_deref(), Some("4006"));
        assert_eq!(service.data_source.extraction_method, "csv_import");
    }

    #[tokio::test]
    async fn semicolon_delimited_exports() {
        let file = csv_file("name;organisation\nMen's Shed Logan;Rotary\n");
        let adapter = CsvFileAdapter::new("csv", file.path()).with_delimiter(b';');

        let records = adapter.extract(10, &ExtractConfig::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["organisation"], "Rotary");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let adapter = CsvFileAdapter::new("csv", "/nonexistent/wayfinder/services.csv");
        let err = adapter
            .extract(10, &ExtractConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IoError(_)));
    }
}
