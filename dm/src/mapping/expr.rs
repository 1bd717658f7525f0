//! Field-map documents and their source expressions

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use super::row::FieldPath;
use crate::error::MapperError;

/// Prefix marking a literal string in a field map
pub const STATIC_PREFIX: &str = "static:";

/// Reserved key naming the target schema
pub const TARGET_DATA_MODEL_KEY: &str = "targetDataModel";
pub const ID_SITE_KEY: &str = "idSite";
pub const ID_SERVICE_KEY: &str = "idService";
pub const ID_GROUP_KEY: &str = "idGroup";

/// Where a destination value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceExpression {
    /// `static:<text>`, or a JSON number/boolean
    Literal(String),

    /// A (possibly dotted) row key
    FieldPath(FieldPath),

    /// Ordered tokens joined into one string
    Concat(Vec<SourceExpression>),

    /// `{type: "static:<T>", coordinates: [latPath, lonPath]}`
    GeometryPair {
        geometry_type: String,
        lat: FieldPath,
        lon: FieldPath,
    },

    /// A JSON array of literals and paths
    ArrayLiteral(Vec<SourceExpression>),

    /// A JSON object mapping subkeys of an object property
    Object(BTreeMap<String, SourceExpression>),
}

impl SourceExpression {
    /// Classify one field-map value
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(parse_string(s)),
            Value::Number(n) => Ok(Self::Literal(n.to_string())),
            Value::Bool(b) => Ok(Self::Literal(b.to_string())),
            Value::Null => Err("null is not a valid source".to_string()),
            Value::Array(items) => items
                .iter()
                .map(parse_token)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::ArrayLiteral),
            Value::Object(obj) => {
                if let Some(pair) = parse_geometry_pair(obj) {
                    return Ok(pair);
                }
                let mut fields = BTreeMap::new();
                for (key, sub) in obj {
                    match Self::parse(sub) {
                        Ok(expr) => {
                            fields.insert(key.clone(), expr);
                        }
                        Err(reason) => debug!(%key, %reason, "SourceExpression::parse: skipping subkey"),
                    }
                }
                Ok(Self::Object(fields))
            }
        }
    }

    /// Reinterpret an array as a concatenation (scalar destinations)
    pub fn into_scalar(self) -> Self {
        match self {
            Self::ArrayLiteral(tokens) => Self::Concat(tokens),
            other => other,
        }
    }

    /// Short kind name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "literal",
            Self::FieldPath(_) => "field path",
            Self::Concat(_) => "concatenation",
            Self::GeometryPair { .. } => "geometry pair",
            Self::ArrayLiteral(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

fn parse_string(s: &str) -> SourceExpression {
    match s.strip_prefix(STATIC_PREFIX) {
        Some(literal) => SourceExpression::Literal(literal.to_string()),
        None => SourceExpression::FieldPath(FieldPath::parse(s)),
    }
}

fn parse_token(value: &Value) -> Result<SourceExpression, String> {
    match value {
        Value::String(s) => Ok(parse_string(s)),
        Value::Number(n) => Ok(SourceExpression::Literal(n.to_string())),
        Value::Bool(b) => Ok(SourceExpression::Literal(b.to_string())),
        other => Err(format!("array tokens must be strings, got {}", other)),
    }
}

fn parse_geometry_pair(obj: &serde_json::Map<String, Value>) -> Option<SourceExpression> {
    let geometry_type = obj.get("type")?.as_str()?.strip_prefix(STATIC_PREFIX)?;
    let coordinates = obj.get("coordinates")?.as_array()?;
    let [lat, lon] = coordinates.as_slice() else {
        return None;
    };
    Some(SourceExpression::GeometryPair {
        geometry_type: geometry_type.to_string(),
        lat: FieldPath::parse(lat.as_str()?),
        lon: FieldPath::parse(lon.as_str()?),
    })
}

/// A parsed field-map document
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    /// Schema name from `targetDataModel`
    pub target_data_model: Option<String>,
    pub id_site: Option<String>,
    pub id_service: Option<String>,
    pub id_group: Option<String>,

    /// Source of the entity name
    pub identity: Option<SourceExpression>,

    /// Destination name to source, reserved keys removed
    pub fields: BTreeMap<String, SourceExpression>,

    /// Keys whose values could not be parsed, with the reason
    pub unparsable: Vec<(String, String)>,
}

impl FieldMap {
    /// Parse a field-map document
    pub fn from_value(document: &Value, identity_key: &str) -> Result<Self, MapperError> {
        let obj = document
            .as_object()
            .ok_or_else(|| MapperError::config("field map must be a JSON object"))?;

        let mut map = Self::default();
        for (key, value) in obj {
            match key.as_str() {
                TARGET_DATA_MODEL_KEY => map.target_data_model = reserved_string(key, value)?,
                ID_SITE_KEY => map.id_site = reserved_string(key, value)?,
                ID_SERVICE_KEY => map.id_service = reserved_string(key, value)?,
                ID_GROUP_KEY => map.id_group = reserved_string(key, value)?,
                _ => match SourceExpression::parse(value) {
                    Ok(expr) if key == identity_key => map.identity = Some(expr),
                    Ok(expr) => {
                        map.fields.insert(key.clone(), expr);
                    }
                    Err(reason) => {
                        warn!(%key, %reason, "Unparsable field map entry");
                        map.unparsable.push((key.clone(), reason));
                    }
                },
            }
        }

        debug!(
            fields = map.fields.len(),
            has_identity = map.identity.is_some(),
            target = ?map.target_data_model,
            "FieldMap parsed"
        );
        Ok(map)
    }

    /// Read and parse a field-map file
    pub fn load(path: &Path, identity_key: &str) -> Result<Self, MapperError> {
        debug!(?path, "FieldMap::load: called");
        let content = std::fs::read_to_string(path)
            .map_err(|e| MapperError::config(format!("cannot read map file {}: {}", path.display(), e)))?;
        let document: Value = serde_json::from_str(&content)
            .map_err(|e| MapperError::config(format!("invalid map file {}: {}", path.display(), e)))?;
        Self::from_value(&document, identity_key)
    }
}

fn reserved_string(key: &str, value: &Value) -> Result<Option<String>, MapperError> {
    match value {
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.strip_prefix(STATIC_PREFIX).unwrap_or(s).to_string())),
        Value::Null => Ok(None),
        other => Err(MapperError::config(format!("{} must be a string, got {}", key, other))),
    }
}
