//! Validated entities and their NGSI wire form

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::NormalizedSchema;

/// One NGSI attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: Value,
}

/// A mapped row that passed whole-object validation
///
/// Serializes as `{id, type, <attr>: {type, value}, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEntity {
    pub id: String,

    #[serde(rename = "type")]
    pub entity_type: String,

    #[serde(flatten)]
    pub attributes: BTreeMap<String, Attribute>,
}

impl ValidatedEntity {
    /// Convert a validated key/value object; `id` and `type` become top-level
    pub fn from_object(object: Map<String, Value>, schema: &NormalizedSchema) -> Self {
        let mut id = String::new();
        let mut entity_type = schema.entity_type().to_string();
        let mut attributes = BTreeMap::new();

        for (name, value) in object {
            match (name.as_str(), value) {
                ("id", Value::String(s)) => id = s,
                ("type", Value::String(s)) => entity_type = s,
                (_, value) => {
                    let attr_type = schema.attribute_type(&name);
                    attributes.insert(name, Attribute { attr_type, value });
                }
            }
        }

        Self {
            id,
            entity_type,
            attributes,
        }
    }

    /// Attributes only, as sent to `/v2/entities/{id}/attrs`
    pub fn attrs_body(&self) -> Value {
        let attrs: Map<String, Value> = self
            .attributes
            .iter()
            .filter_map(|(name, attr)| serde_json::to_value(attr).ok().map(|v| (name.clone(), v)))
            .collect();
        Value::Object(attrs)
    }
}
