//! Flattening of layered (`allOf`) schemas into one property map

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::validate::{SchemaValidators, ValidationIssue};
use super::{PropertySchema, SchemaError, SchemaType, string_list};

/// Flattened, immutable view of a target data model
#[derive(Debug, Clone)]
pub struct NormalizedSchema {
    /// Merged properties of every `allOf` layer
    properties: BTreeMap<String, PropertySchema>,

    /// Raw (dereferenced) JSON of every merged property, for reporting
    raw_properties: Map<String, Value>,

    /// Required property names, from the root and every layer
    required: Vec<String>,

    /// Whole-object `anyOf` constraints (e.g. "one of address/location")
    any_of: Vec<Value>,

    /// Entity type, from the last layer's `properties.type.enum[0]`
    entity_type: String,

    /// Compiled from [`Self::to_document`] and each raw property
    validators: Arc<SchemaValidators>,
}

impl NormalizedSchema {
    /// Normalize a fully dereferenced schema document
    ///
    /// Layers are merged in order; on a name collision the later layer wins.
    pub fn from_document(document: &Value) -> Result<Self, SchemaError> {
        debug!("NormalizedSchema::from_document: called");
        let root = document
            .as_object()
            .ok_or_else(|| SchemaError::Invalid("schema root must be an object".to_string()))?;

        let mut layers = Vec::new();
        match root.get("allOf") {
            Some(Value::Array(items)) => flatten_layers(items, &mut layers),
            Some(_) => return Err(SchemaError::Invalid("allOf must be an array".to_string())),
            None => layers.push(document),
        }
        // Root-level properties sit alongside the allOf chain, below every layer
        if root.contains_key("allOf")
            && let Some(Value::Object(_)) = root.get("properties")
        {
            layers.insert(0, document);
        }

        let mut raw_properties = Map::new();
        let mut required = string_list(root.get("required"));
        for layer in &layers {
            if let Some(Value::Object(props)) = layer.get("properties") {
                for (name, prop) in props {
                    raw_properties.insert(name.clone(), prop.clone());
                }
            }
            for name in string_list(layer.get("required")) {
                if !required.contains(&name) {
                    required.push(name);
                }
            }
        }

        let entity_type = layers
            .last()
            .and_then(|layer| entity_type_of(layer))
            .or_else(|| raw_properties.get("type").and_then(type_enum_head))
            .ok_or(SchemaError::MissingEntityType)?;

        let mut properties = BTreeMap::new();
        for (name, prop) in &raw_properties {
            properties.insert(name.clone(), PropertySchema::from_value(prop)?);
        }

        let any_of = match root.get("anyOf") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let document = normalized_document(&raw_properties, &required, &any_of, &entity_type);
        let validators = SchemaValidators::compile(&document, &raw_properties)?;

        info!(
            entity_type = %entity_type,
            properties = properties.len(),
            layers = layers.len(),
            required = required.len(),
            "Schema normalized"
        );

        Ok(Self {
            properties,
            raw_properties,
            required,
            any_of,
            entity_type,
            validators: Arc::new(validators),
        })
    }

    /// Entity type every mapped entity gets
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Schema of a destination property
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }

    /// Merged property names
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Validate one mapped field with `required`/`anyOf` relaxed
    pub fn validate_field(&self, name: &str, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        self.validators.check_field(name, value)
    }

    /// Validate a complete key/value object, including `required` and `anyOf`
    pub fn validate_entity(&self, object: &Map<String, Value>) -> Result<(), Vec<ValidationIssue>> {
        self.validators.check_entity(&Value::Object(object.clone()))
    }

    /// Attribute type used in the NGSI wire form
    pub fn attribute_type(&self, name: &str) -> String {
        if name == "location" || name == "geometry" {
            return "geo:json".to_string();
        }
        match self.properties.get(name) {
            Some(schema) if schema.is_date_time() => "DateTime".to_string(),
            Some(schema) => schema
                .primary_type()
                .unwrap_or(SchemaType::String)
                .as_str()
                .to_string(),
            None => SchemaType::String.as_str().to_string(),
        }
    }

    /// Normalized document: a single `allOf` layer holding every property
    pub fn to_document(&self) -> Value {
        normalized_document(&self.raw_properties, &self.required, &self.any_of, &self.entity_type)
    }
}

fn normalized_document(
    properties: &Map<String, Value>,
    required: &[String],
    any_of: &[Value],
    entity_type: &str,
) -> Value {
    let mut document = json!({
        "allOf": [{"properties": Value::Object(properties.clone())}],
        "required": required,
        "entityType": entity_type,
    });
    if !any_of.is_empty() {
        document["anyOf"] = Value::Array(any_of.to_vec());
    }
    document
}

/// Collect layers in declaration order, expanding nested `allOf`s in place
fn flatten_layers<'a>(items: &'a [Value], layers: &mut Vec<&'a Value>) {
    for item in items {
        match item.get("allOf") {
            Some(Value::Array(nested)) => {
                if item.get("properties").is_some() {
                    layers.push(item);
                }
                flatten_layers(nested, layers);
            }
            _ => layers.push(item),
        }
    }
}

fn entity_type_of(layer: &Value) -> Option<String> {
    layer.get("properties").and_then(|p| p.get("type")).and_then(type_enum_head)
}

fn type_enum_head(type_prop: &Value) -> Option<String> {
    type_prop
        .get("enum")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|v| v.as_str())
        .map(String::from)
}
