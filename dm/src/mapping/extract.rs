//! Typed extractors and the value coercions they apply

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value, json};
use thiserror::Error;
use tracing::debug;

use super::row::{FieldPath, RawRow};

/// A field value that could not be produced (FieldExtractionError)
///
/// Always recoverable: the field is dropped and the row continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("source field '{path}' not found in row")]
    MissingSource { path: String },

    #[error("'{value}' is not a number")]
    NotANumber { value: String },

    #[error("'{value}' is not a valid date")]
    InvalidDate { value: String },

    #[error("{reason}")]
    Invalid { reason: String },
}

/// One token of a concatenation
#[derive(Debug, Clone, PartialEq)]
pub enum ConcatToken {
    /// Sanitized literal text
    Literal(String),
    Field(FieldPath),
}

/// A compiled, per-field value producer
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// Fixed value
    Constant(Value),

    /// Row value, unchanged
    Lookup(FieldPath),

    /// Inner value coerced to a JSON number
    Number(Box<Extractor>),

    /// Inner value coerced to a boolean; a missing value is `false`
    Boolean(Box<Extractor>),

    /// Inner value rendered as ISO-8601; empty or missing skips the field
    DateTime(Box<Extractor>),

    /// Tokens joined in order
    Concat(Vec<ConcatToken>),

    /// Ordered list of values
    Array(Vec<Extractor>),

    /// GeoJSON geometry from a latitude/longitude pair
    Geometry {
        geometry_type: String,
        lat: FieldPath,
        lon: FieldPath,
    },

    /// Nested object, one extractor per subkey
    Object(BTreeMap<String, Extractor>),
}

impl Extractor {
    /// Produce the value for one row
    ///
    /// `Ok(None)` means the field is skipped without error.
    pub fn evaluate(&self, row: &RawRow) -> Result<Option<Value>, ExtractionError> {
        match self {
            Extractor::Constant(value) => Ok(Some(value.clone())),
            Extractor::Lookup(path) => lookup(row, path).cloned().map(Some),
            Extractor::Number(inner) => match inner.evaluate(row)? {
                Some(value) => coerce_number(&value).map(Some),
                None => Ok(None),
            },
            Extractor::Boolean(inner) => match inner.evaluate(row) {
                Ok(Some(value)) => Ok(Some(Value::Bool(coerce_boolean(&value)))),
                Ok(None) | Err(ExtractionError::MissingSource { .. }) => Ok(Some(Value::Bool(false))),
                Err(e) => Err(e),
            },
            Extractor::DateTime(inner) => match inner.evaluate(row) {
                Ok(Some(value)) => coerce_date_time(&value),
                Ok(None) | Err(ExtractionError::MissingSource { .. }) => Ok(None),
                Err(e) => Err(e),
            },
            Extractor::Concat(tokens) => {
                let mut out = String::new();
                for token in tokens {
                    match token {
                        ConcatToken::Literal(text) => out.push_str(text),
                        ConcatToken::Field(path) => out.push_str(&value_text(lookup(row, path)?)),
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Extractor::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = item.evaluate(row)? {
                        out.push(value);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Extractor::Geometry { geometry_type, lat, lon } => {
                let lat = coerce_number(lookup(row, lat)?)?;
                let lon = coerce_number(lookup(row, lon)?)?;
                Ok(Some(json!({"type": geometry_type, "coordinates": [lat, lon]})))
            }
            Extractor::Object(fields) => {
                let mut out = Map::new();
                for (key, extractor) in fields {
                    match extractor.evaluate(row) {
                        Ok(Some(value)) => {
                            out.insert(key.clone(), value);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(%key, error = %e, "Extractor::evaluate: dropping subfield"),
                    }
                }
                Ok(Some(Value::Object(out)))
            }
        }
    }

    /// One-line description of the extractor, for `dm check`
    pub fn describe(&self) -> String {
        match self {
            Extractor::Constant(value) => format!("constant {}", value),
            Extractor::Lookup(path) => format!("lookup '{}'", path),
            Extractor::Number(inner) => format!("number({})", inner.describe()),
            Extractor::Boolean(inner) => format!("boolean({})", inner.describe()),
            Extractor::DateTime(inner) => format!("date-time({})", inner.describe()),
            Extractor::Concat(tokens) => {
                let parts: Vec<String> = tokens
                    .iter()
                    .map(|t| match t {
                        ConcatToken::Literal(text) => format!("\"{}\"", text),
                        ConcatToken::Field(path) => format!("'{}'", path),
                    })
                    .collect();
                format!("concat[{}]", parts.join(" + "))
            }
            Extractor::Array(items) => {
                let parts: Vec<String> = items.iter().map(Extractor::describe).collect();
                format!("array[{}]", parts.join(", "))
            }
            Extractor::Geometry { geometry_type, lat, lon } => {
                format!("{}('{}', '{}')", geometry_type, lat, lon)
            }
            Extractor::Object(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, e)| format!("{}: {}", k, e.describe())).collect();
                format!("object{{{}}}", parts.join(", "))
            }
        }
    }
}

fn lookup<'a>(row: &'a RawRow, path: &FieldPath) -> Result<&'a Value, ExtractionError> {
    row.lookup(path).ok_or_else(|| ExtractionError::MissingSource {
        path: path.as_str().to_string(),
    })
}

/// Text form of a row value, as used in concatenations and identities
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric coercion
///
/// Numeric strings (surrounding whitespace allowed) and booleans convert;
/// empty strings and anything else do not. Integral results are emitted
/// as integers.
pub fn coerce_number(value: &Value) -> Result<Value, ExtractionError> {
    let not_a_number = || ExtractionError::NotANumber {
        value: value_text(value),
    };
    let n = match value {
        Value::Number(n) => return Ok(Value::Number(n.clone())),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(not_a_number());
            }
            trimmed.parse::<f64>().map_err(|_| not_a_number())?
        }
        _ => return Err(not_a_number()),
    };
    number_value(n).ok_or_else(not_a_number)
}

fn number_value(n: f64) -> Option<Value> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}

/// Boolean coercion: `"true"` in any case, `"1"` and `1` are true
pub fn coerce_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Date-time coercion to ISO-8601 UTC with milliseconds
///
/// Accepts RFC 3339, RFC 2822, naive date-times and dates (taken as UTC),
/// year-months and bare years (first instant of the period), and epoch
/// milliseconds given as JSON numbers. Empty strings skip the field.
pub fn coerce_date_time(value: &Value) -> Result<Option<Value>, ExtractionError> {
    let parsed = match value {
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => parse_date_time(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|ms| ms as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    match parsed {
        Some(dt) => Ok(Some(Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))),
        None => Err(ExtractionError::InvalidDate {
            value: value_text(value),
        }),
    }
}

const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    // Year-month, pinned to the first day
    for (format, first_day) in [("%Y-%m-%d", "-01"), ("%Y/%m/%d", "/01")] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}{}", s, first_day), format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(value: Value) -> RawRow {
        match value {
            Value::Object(map) => RawRow::sanitize(map),
            _ => panic!("test rows must be objects"),
        }
    }

    #[test]
    fn test_boolean_coercion() {
        for truthy in [json!("true"), json!("TRUE"), json!("1"), json!(1), json!(true)] {
            assert!(coerce_boolean(&truthy), "{} should be true", truthy);
        }
        for falsy in [json!("false"), json!("0"), json!(0), json!("yes"), json!(null), json!(2)] {
            assert!(!coerce_boolean(&falsy), "{} should be false", falsy);
        }
    }

    #[test]
    fn test_boolean_missing_source_is_false() {
        let extractor = Extractor::Boolean(Box::new(Extractor::Lookup(FieldPath::parse("absent"))));
        assert_eq!(extractor.evaluate(&row(json!({}))).unwrap(), Some(json!(false)));
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(coerce_number(&json!("42")).unwrap(), json!(42));
        assert_eq!(coerce_number(&json!(" 3.5 ")).unwrap(), json!(3.5));
        assert_eq!(coerce_number(&json!("1e3")).unwrap(), json!(1000));
        assert_eq!(coerce_number(&json!(true)).unwrap(), json!(1));
        assert_eq!(coerce_number(&json!(7.25)).unwrap(), json!(7.25));
        assert!(coerce_number(&json!("")).is_err());
        assert!(coerce_number(&json!("12,5")).is_err());
        assert!(coerce_number(&json!("abc")).is_err());
        assert!(coerce_number(&json!([1])).is_err());
    }

    #[test]
    fn test_concat_preserves_order() {
        let extractor = Extractor::Concat(vec![
            ConcatToken::Literal("P-".into()),
            ConcatToken::Field(FieldPath::parse("a")),
            ConcatToken::Literal("-".into()),
            ConcatToken::Field(FieldPath::parse("b")),
        ]);
        let value = extractor.evaluate(&row(json!({"a": "X", "b": "Y"}))).unwrap();
        assert_eq!(value, Some(json!("P-X-Y")));
    }

    #[test]
    fn test_concat_missing_field_is_error() {
        let extractor = Extractor::Concat(vec![ConcatToken::Field(FieldPath::parse("a"))]);
        assert!(matches!(
            extractor.evaluate(&row(json!({}))),
            Err(ExtractionError::MissingSource { .. })
        ));
    }

    #[test]
    fn test_number_of_concatenation() {
        let extractor = Extractor::Number(Box::new(Extractor::Concat(vec![
            ConcatToken::Field(FieldPath::parse("int")),
            ConcatToken::Literal(".".into()),
            ConcatToken::Field(FieldPath::parse("dec")),
        ])));
        let value = extractor.evaluate(&row(json!({"int": "12", "dec": "5"}))).unwrap();
        assert_eq!(value, Some(json!(12.5)));
    }

    #[test]
    fn test_date_time_coercion() {
        let iso = |v: Value| coerce_date_time(&v).unwrap().unwrap();
        assert_eq!(iso(json!("2021-03-04T05:06:07Z")), json!("2021-03-04T05:06:07.000Z"));
        assert_eq!(iso(json!("2021-03-04T07:06:07+02:00")), json!("2021-03-04T05:06:07.000Z"));
        assert_eq!(iso(json!("2021-03-04 05:06:07")), json!("2021-03-04T05:06:07.000Z"));
        assert_eq!(iso(json!("2021-03-04")), json!("2021-03-04T00:00:00.000Z"));
        assert_eq!(iso(json!(0)), json!("1970-01-01T00:00:00.000Z"));
        assert_eq!(coerce_date_time(&json!("")).unwrap(), None);
        assert!(coerce_date_time(&json!("not a date")).is_err());
    }

    #[test]
    fn test_bare_year_is_first_instant() {
        let iso = |v: Value| coerce_date_time(&v).unwrap().unwrap();
        assert_eq!(iso(json!("2021")), json!("2021-01-01T00:00:00.000Z"));
        assert_eq!(iso(json!(" 1999 ")), json!("1999-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_year_month_is_first_day() {
        let iso = |v: Value| coerce_date_time(&v).unwrap().unwrap();
        assert_eq!(iso(json!("2021-03")), json!("2021-03-01T00:00:00.000Z"));
        assert_eq!(iso(json!("2021/11")), json!("2021-11-01T00:00:00.000Z"));
        assert!(coerce_date_time(&json!("2021-13")).is_err());
    }

    #[test]
    fn test_month_first_dates() {
        let iso = |v: Value| coerce_date_time(&v).unwrap().unwrap();
        assert_eq!(iso(json!("03/04/2021")), json!("2021-03-04T00:00:00.000Z"));
        assert_eq!(iso(json!("03/04/2021 10:30")), json!("2021-03-04T10:30:00.000Z"));
        assert_eq!(iso(json!("12/31/2020 23:59:58")), json!("2020-12-31T23:59:58.000Z"));
    }

    #[test]
    fn test_epoch_millis_only_from_numbers() {
        let iso = |v: Value| coerce_date_time(&v).unwrap().unwrap();
        assert_eq!(iso(json!(1614816000000i64)), json!("2021-03-04T00:00:00.000Z"));
        assert!(coerce_date_time(&json!("1614816000000")).is_err());
    }

    #[test]
    fn test_date_time_missing_source_skips() {
        let extractor = Extractor::DateTime(Box::new(Extractor::Lookup(FieldPath::parse("when"))));
        assert_eq!(extractor.evaluate(&row(json!({}))).unwrap(), None);
    }

    #[test]
    fn test_geometry() {
        let extractor = Extractor::Geometry {
            geometry_type: "Point".into(),
            lat: FieldPath::parse("lat"),
            lon: FieldPath::parse("lon"),
        };
        let value = extractor.evaluate(&row(json!({"lat": "45.07", "lon": "7.69"}))).unwrap();
        assert_eq!(value, Some(json!({"type": "Point", "coordinates": [45.07, 7.69]})));

        let bad = extractor.evaluate(&row(json!({"lat": "", "lon": "7.69"})));
        assert!(matches!(bad, Err(ExtractionError::NotANumber { .. })));
    }

    #[test]
    fn test_object_drops_failing_subfields() {
        let mut fields = BTreeMap::new();
        fields.insert("street".to_string(), Extractor::Lookup(FieldPath::parse("via")));
        fields.insert("zip".to_string(), Extractor::Lookup(FieldPath::parse("cap")));
        let value = Extractor::Object(fields).evaluate(&row(json!({"via": "Via Po"}))).unwrap();
        assert_eq!(value, Some(json!({"street": "Via Po"})));
    }

    #[test]
    fn test_describe() {
        let extractor = Extractor::Number(Box::new(Extractor::Lookup(FieldPath::parse("temp"))));
        assert_eq!(extractor.describe(), "number(lookup 'temp')");
    }

    proptest! {
        #[test]
        fn prop_integers_roundtrip_through_text(n in -1_000_000_000i64..1_000_000_000i64) {
            prop_assert_eq!(coerce_number(&json!(n.to_string())).unwrap(), json!(n));
        }

        #[test]
        fn prop_boolean_never_panics(s in ".*") {
            let expected = s.eq_ignore_ascii_case("true") || s == "1";
            prop_assert_eq!(coerce_boolean(&json!(s)), expected);
        }
    }
}
