//! Target data model schemas
//!
//! A target schema is a layered JSON Schema: a top-level `allOf` whose
//! layers each contribute properties, possibly pulling them in through
//! `$ref` from other files or URLs. Mapping needs one flat view of it:
//!
//! ```text
//! schema.json ──load──▶ dereferenced document ──normalize──▶ NormalizedSchema
//!   ($ref to files/urls)     (no $ref left)          (one property map,
//!                                                      required set, entity type)
//! ```
//!
//! The [`NormalizedSchema`] is built once per run and shared read-only by
//! every row.

mod loader;
mod normalize;
mod validate;

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use loader::{Location, SchemaLoader, dereference_local};
pub use normalize::NormalizedSchema;
pub use validate::{ValidationIssue, describe};

/// Errors raised while loading, dereferencing or normalizing a schema
///
/// All of them are fatal for the run.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to load schema from {location}: {reason}")]
    Load { location: String, reason: String },

    #[error("Unresolved reference {reference}: {reason}")]
    Unresolved { reference: String, reason: String },

    #[error("Cyclic reference {reference}")]
    Cyclic { reference: String },

    #[error("Schema does not declare an entity type enum (properties.type.enum)")]
    MissingEntityType,

    #[error("Invalid schema: {0}")]
    Invalid(String),
}

/// JSON Schema primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// JSON Schema name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed view of one (dereferenced) JSON Schema node
///
/// Only the keywords the compiler coerces by are kept; validation runs on
/// the raw document through [`NormalizedSchema`].
#[derive(Debug, Clone, Default)]
pub struct PropertySchema {
    /// Allowed types; empty means any type
    pub types: Vec<SchemaType>,
    pub format: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub const_value: Option<Value>,
    pub one_of: Vec<PropertySchema>,
    pub any_of: Vec<PropertySchema>,
    pub all_of: Vec<PropertySchema>,
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    /// Parse a dereferenced schema node
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let Some(obj) = value.as_object() else {
            // `true`/`false` schemas and other non-objects accept anything
            return Ok(Self::default());
        };

        let types = match obj.get("type") {
            Some(Value::String(name)) => SchemaType::parse(name).into_iter().collect(),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(|n| n.as_str())
                .filter_map(SchemaType::parse)
                .collect(),
            _ => Vec::new(),
        };

        let mut properties = BTreeMap::new();
        if let Some(Value::Object(props)) = obj.get("properties") {
            for (name, sub) in props {
                properties.insert(name.clone(), Self::from_value(sub)?);
            }
        }

        let items = match obj.get("items") {
            Some(sub @ Value::Object(_)) => Some(Box::new(Self::from_value(sub)?)),
            _ => None,
        };

        Ok(Self {
            types,
            format: obj.get("format").and_then(|f| f.as_str()).map(String::from),
            enum_values: obj.get("enum").and_then(|e| e.as_array()).cloned(),
            const_value: obj.get("const").cloned(),
            one_of: parse_list(obj.get("oneOf"))?,
            any_of: parse_list(obj.get("anyOf"))?,
            all_of: parse_list(obj.get("allOf"))?,
            properties,
            required: string_list(obj.get("required")),
            items,
        })
    }

    /// First declared non-null type
    pub fn primary_type(&self) -> Option<SchemaType> {
        self.types.iter().copied().find(|t| *t != SchemaType::Null)
    }

    /// True for `date-time` string properties
    pub fn is_date_time(&self) -> bool {
        self.format.as_deref() == Some("date-time")
    }

    /// Enumerated `type` values of a `oneOf` variant (e.g. geometry kinds)
    pub fn variant_type_names(&self) -> Vec<String> {
        self.one_of
            .iter()
            .filter_map(|variant| variant.properties.get("type"))
            .filter_map(|t| t.enum_values.as_ref())
            .flatten()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }
}

/// Load, dereference and normalize the schema at a path or URL
pub async fn load_normalized(raw_location: &str, timeout: Duration) -> Result<NormalizedSchema, SchemaError> {
    let location = Location::parse(raw_location);
    let document = SchemaLoader::new(timeout)?.load(&location).await?;
    NormalizedSchema::from_document(&document)
}

fn parse_list(value: Option<&Value>) -> Result<Vec<PropertySchema>, SchemaError> {
    match value {
        Some(Value::Array(items)) => items.iter().map(PropertySchema::from_value).collect(),
        _ => Ok(Vec::new()),
    }
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|i| i.as_str().map(String::from)).collect())
        .unwrap_or_default()
}
