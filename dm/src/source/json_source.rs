//! JSON array and GeoJSON FeatureCollection rows

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use super::{SourceError, SourceRow};
use crate::mapping::RawRow;

/// Rows of a JSON document
///
/// A top-level array yields one row per element. A GeoJSON
/// `FeatureCollection` yields one row per feature: its `properties` plus
/// its `geometry` under the `geometry` key.
pub struct JsonSource {
    records: std::iter::Enumerate<std::vec::IntoIter<Value>>,
    geojson: bool,
}

impl JsonSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        debug!(?path, "JsonSource::open: called");
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_json::from_str(&content).map_err(|e| SourceError::Format(format!("{}: {}", path.display(), e)))?;
        Self::from_document(document)
    }

    pub fn from_document(document: Value) -> Result<Self, SourceError> {
        let (items, geojson) = match document {
            Value::Array(items) => (items, false),
            Value::Object(mut obj) if obj.get("type").and_then(|t| t.as_str()) == Some("FeatureCollection") => {
                match obj.remove("features") {
                    Some(Value::Array(features)) => (features, true),
                    _ => return Err(SourceError::Format("FeatureCollection without a features array".into())),
                }
            }
            _ => {
                return Err(SourceError::Format(
                    "expected a JSON array or a GeoJSON FeatureCollection".into(),
                ));
            }
        };
        debug!(records = items.len(), geojson, "JsonSource::from_document: parsed");

        Ok(Self {
            records: items.into_iter().enumerate(),
            geojson,
        })
    }
}

fn feature_row(feature: Map<String, Value>) -> Result<Map<String, Value>, String> {
    let mut feature = feature;
    let mut row = match feature.remove("properties") {
        Some(Value::Object(props)) => props,
        Some(Value::Null) | None => Map::new(),
        Some(other) => return Err(format!("feature properties must be an object, got {}", other)),
    };
    if let Some(geometry) = feature.remove("geometry") {
        row.insert("geometry".to_string(), geometry);
    }
    Ok(row)
}

impl Iterator for JsonSource {
    type Item = Result<SourceRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, value) = self.records.next()?;
        let ordinal = index as u64 + 1;
        let values = match value {
            Value::Object(obj) if self.geojson => feature_row(obj),
            Value::Object(obj) => Ok(obj),
            other => Err(format!("expected an object, got {}", other)),
        };
        Some(
            values
                .map(|values| SourceRow {
                    ordinal,
                    row: RawRow::sanitize(values),
                })
                .map_err(|reason| SourceError::Row { ordinal, reason }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_of_objects() {
        let source = JsonSource::from_document(json!([{"a": 1}, {"a": null}])).unwrap();
        let rows: Vec<_> = source.map(Result::unwrap).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row.get("a"), Some(&json!(1)));
        assert_eq!(rows[1].ordinal, 2);
        assert_eq!(rows[1].row.get("a"), Some(&json!("")));
    }

    #[test]
    fn test_feature_collection() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "Stop 1"},
                 "geometry": {"type": "Point", "coordinates": [7.6, 45.0]}},
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        });
        let rows: Vec<_> = JsonSource::from_document(doc).unwrap().map(Result::unwrap).collect();

        assert_eq!(rows[0].row.get("name"), Some(&json!("Stop 1")));
        assert_eq!(
            rows[0].row.get("geometry"),
            Some(&json!({"type": "Point", "coordinates": [7.6, 45.0]}))
        );
        assert_eq!(rows[1].row.get("geometry"), Some(&json!("")));
    }

    #[test]
    fn test_non_object_element_is_error() {
        let items: Vec<_> = JsonSource::from_document(json!([{"a": 1}, 5, {"a": 2}])).unwrap().collect();
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().ordinal(), Some(2));
        assert!(items[2].is_ok());
    }

    #[test]
    fn test_rejects_other_documents() {
        assert!(JsonSource::from_document(json!({"a": 1})).is_err());
        assert!(JsonSource::from_document(json!({"type": "FeatureCollection"})).is_err());
    }
}
