//! Raw source rows and field-path lookup

use serde_json::{Map, Value};

use super::sanitize::normalize_text;

/// A (possibly dotted) reference to a row value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let raw = normalize_text(raw);
        let segments = raw.split('.').map(String::from).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One record delivered by a row source, keyed by column/property name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    /// Wrap an unsanitized record
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Sanitize keys and values: NFC, unsafe characters removed, `null` to `""`
    pub fn sanitize(values: Map<String, Value>) -> Self {
        Self(sanitize_map(values))
    }

    /// Resolve a field path
    ///
    /// The exact key wins (CSV headers may contain dots); otherwise the
    /// segments are walked through nested objects and array indices.
    pub fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        if let Some(value) = self.0.get(path.as_str()) {
            return Some(value);
        }
        if path.segments().len() < 2 {
            return None;
        }

        let (first, rest) = path.segments().split_first()?;
        let mut current = self.0.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(obj) => obj.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn sanitize_map(values: Map<String, Value>) -> Map<String, Value> {
    values
        .into_iter()
        .map(|(key, value)| (normalize_text(&key), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_text(&s)),
        Value::Null => Value::String(String::new()),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(obj) => Value::Object(sanitize_map(obj)),
        other => other,
    }
}
