//! Row sources
//!
//! A row source yields `SourceRow { ordinal, row }` items in strictly
//! increasing ordinal order. Ordinals are 1-based and count every record
//! in the input, so they stay stable no matter which window is selected.
//! Malformed records are yielded as errors rather than skipped.

mod csv_source;
mod json_source;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use csv_source::CsvSource;
pub use json_source::JsonSource;
use crate::mapping::RawRow;

/// Errors raised while opening or reading a row source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported source format '{0}' (expected .csv, .txt, .json or .geojson)")]
    UnsupportedFormat(String),

    #[error("Invalid source document: {0}")]
    Format(String),

    #[error("Row {ordinal}: {reason}")]
    Row { ordinal: u64, reason: String },
}

impl SourceError {
    /// Ordinal of the record the error belongs to, if any
    pub fn ordinal(&self) -> Option<u64> {
        match self {
            SourceError::Row { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }
}

/// One record and its position in the input
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub ordinal: u64,
    pub row: RawRow,
}

/// Boxed row iterator
pub type RowSource = Box<dyn Iterator<Item = Result<SourceRow, SourceError>> + Send>;

/// Inclusive `[start, end]` ordinal window; `end: None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowWindow {
    pub start: u64,
    pub end: Option<u64>,
}

impl RowWindow {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ordinal: u64) -> bool {
        ordinal >= self.start && self.end.is_none_or(|end| ordinal <= end)
    }

    fn is_past(&self, ordinal: u64) -> bool {
        self.end.is_some_and(|end| ordinal > end)
    }
}

/// Restrict a source to a window, stopping once past its end
pub struct Windowed<I> {
    inner: I,
    window: RowWindow,
    done: bool,
}

impl<I> Windowed<I> {
    pub fn new(inner: I, window: RowWindow) -> Self {
        Self {
            inner,
            window,
            done: false,
        }
    }
}

impl<I> Iterator for Windowed<I>
where
    I: Iterator<Item = Result<SourceRow, SourceError>>,
{
    type Item = Result<SourceRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let item = self.inner.next()?;
            let ordinal = match &item {
                Ok(row) => Some(row.ordinal),
                Err(e) => e.ordinal(),
            };
            match ordinal {
                Some(o) if self.window.is_past(o) => self.done = true,
                Some(o) if !self.window.contains(o) => continue,
                _ => return Some(item),
            }
        }
        None
    }
}

/// Open a source by file extension
pub fn open_source(path: &Path, csv_delimiter: char, window: RowWindow) -> Result<RowSource, SourceError> {
    debug!(?path, ?window, "open_source: called");
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let source: RowSource = match extension.as_str() {
        "csv" | "txt" => Box::new(Windowed::new(CsvSource::open(path, csv_delimiter)?, window)),
        "json" | "geojson" => Box::new(Windowed::new(JsonSource::open(path)?, window)),
        other => return Err(SourceError::UnsupportedFormat(other.to_string())),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::io::Write;
    use tempfile::Builder;

    fn rows(n: u64) -> impl Iterator<Item = Result<SourceRow, SourceError>> {
        (1..=n).map(|ordinal| {
            if ordinal == 3 {
                Err(SourceError::Row {
                    ordinal,
                    reason: "bad".into(),
                })
            } else {
                Ok(SourceRow {
                    ordinal,
                    row: RawRow::new(Map::new()),
                })
            }
        })
    }

    fn ordinals(window: RowWindow) -> Vec<Result<u64, u64>> {
        Windowed::new(rows(6), window)
            .map(|item| match item {
                Ok(row) => Ok(row.ordinal),
                Err(e) => Err(e.ordinal().unwrap()),
            })
            .collect()
    }

    #[test]
    fn test_window_unbounded() {
        assert_eq!(ordinals(RowWindow::new(0, None)), vec![Ok(1), Ok(2), Err(3), Ok(4), Ok(5), Ok(6)]);
    }

    #[test]
    fn test_window_inclusive_bounds() {
        assert_eq!(ordinals(RowWindow::new(2, Some(4))), vec![Ok(2), Err(3), Ok(4)]);
        assert_eq!(ordinals(RowWindow::new(5, Some(5))), vec![Ok(5)]);
    }

    #[test]
    fn test_open_source_unknown_extension() {
        let mut file = Builder::new().suffix(".xlsx").tempfile().unwrap();
        writeln!(file, "x").unwrap();
        assert!(matches!(
            open_source(file.path(), ',', RowWindow::default()),
            Err(SourceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_open_source_by_extension() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "a,b\n1,2\n3,4\n5,6").unwrap();
        let got: Vec<_> = open_source(file.path(), ',', RowWindow::new(2, None))
            .unwrap()
            .map(|r| r.unwrap().ordinal)
            .collect();
        assert_eq!(got, vec![2, 3]);
    }
}
