//! Delimited-text rows

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use serde_json::{Map, Value};
use tracing::debug;

use super::{SourceError, SourceRow};
use crate::mapping::RawRow;

/// CSV file rows; the header row names the keys and every value is a string
pub struct CsvSource {
    headers: Vec<String>,
    records: StringRecordsIntoIter<File>,
    ordinal: u64,
}

impl CsvSource {
    pub fn open(path: &Path, delimiter: char) -> Result<Self, SourceError> {
        debug!(?path, %delimiter, "CsvSource::open: called");
        let delimiter = u8::try_from(delimiter)
            .map_err(|_| SourceError::Format(format!("delimiter '{}' is not a single byte", delimiter)))?;
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = ReaderBuilder::new().delimiter(delimiter).from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| SourceError::Format(format!("cannot read CSV header: {}", e)))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        Ok(Self {
            headers,
            records: reader.into_records(),
            ordinal: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn to_row(&self, record: &StringRecord) -> RawRow {
        let values: Map<String, Value> = self
            .headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), Value::String(value.to_string())))
            .collect();
        RawRow::sanitize(values)
    }
}

impl Iterator for CsvSource {
    type Item = Result<SourceRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.ordinal += 1;
        let ordinal = self.ordinal;
        Some(match record {
            Ok(record) => Ok(SourceRow {
                ordinal,
                row: self.to_row(&record),
            }),
            Err(e) => Err(SourceError::Row {
                ordinal,
                reason: e.to_string(),
            }),
        })
    }
}
